use thiserror::Error;

/// Chip status code for a rejected MiFare authentication
/// (UM0701-02 page 67, 7.1 Error Handling).
pub(crate) const STATUS_MIFARE_AUTH: u8 = 0x14;

#[derive(Debug, Error)]
pub enum Error {
    #[error("serial port: {0}")]
    Port(#[from] serialport::Error),

    #[error("serial i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("chip rejected the last frame (NACK)")]
    Nack,

    #[error("chip reported a syntax error frame")]
    ErrorFrame,

    #[error("frame checksum mismatch")]
    Checksum,

    #[error("malformed frame: {0}")]
    Frame(&'static str),

    #[error("command payload too long ({0} bytes)")]
    PayloadTooLong(usize),

    #[error("response code {got:#04x} does not match command {sent:#04x}")]
    ResponseMismatch { sent: u8, got: u8 },

    #[error("authentication rejected for block {block}")]
    AuthRejected { block: u8 },

    #[error("chip status {status:#04x} for block {block}")]
    Status { status: u8, block: u8 },
}

impl Error {
    /// Whether the condition is worth retrying before an operation deadline
    /// runs out. Everything else either needs operator attention (wrong key,
    /// broken wiring) or indicates a bug.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Nack | Error::Status { .. }
        )
    }
}
