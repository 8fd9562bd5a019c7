//! Host-side access to a PN532 NFC reader over its serial (HSU) interface.
//!
//! Covers the handful of operations needed to work with MiFare Classic
//! cards: chip bring-up, passive target detection, block authentication and
//! block read/write. Frame layout and error codes follow the NXP user guide
//! (UM0701-02).

use std::time::Duration;

pub mod chip;
pub mod error;
pub mod link;
pub mod mifare;
pub mod tag;

#[cfg(test)]
pub(crate) mod testing;

pub use chip::{FirmwareVersion, Pn532};
pub use error::Error;
pub use mifare::{is_sector_trailer, CardSession, Key, KeyType, BLOCK_SIZE};
pub use tag::{TagType, Target, Uid};

/// Serial settings PN532 breakout boards ship with.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Native timeout for a single port read. Operation deadlines are enforced
/// on top of this in [`link::Link`], so it only has to be short enough to
/// keep deadline checks responsive.
const PORT_TIMEOUT: Duration = Duration::from_millis(50);

/// Open the serial device at `path` and wrap it in a [`Pn532`].
///
/// The chip still has to be woken with [`Pn532::wake`] before the first
/// command.
pub fn open(path: &str, baud_rate: u32) -> Result<Pn532<Box<dyn serialport::SerialPort>>, Error> {
    let port = serialport::new(path, baud_rate)
        .timeout(PORT_TIMEOUT)
        .open()?;
    Ok(Pn532::new(port))
}
