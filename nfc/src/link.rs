//! Frame layer for the PN532 High Speed UART interface.
//!
//! Information frame, see UM0701-02 page 28:
//!
//! `00 00 FF LEN LCS TFI PD0..PDn DCS 00`
//!
//! `LEN` counts TFI plus payload, `LCS` is the two's complement of `LEN`,
//! and `DCS` is the two's complement of the byte sum of TFI and payload.

use std::io::{self, Read, Write};
use std::time::Instant;

use log::trace;

use crate::error::Error;

const PREAMBLE: u8 = 0x00;
const START_1: u8 = 0x00;
const START_2: u8 = 0xFF;
const POSTAMBLE: u8 = 0x00;

/// Frame identifier, host to chip.
const TFI_HOST: u8 = 0xD4;
/// Frame identifier, chip to host.
const TFI_CHIP: u8 = 0xD5;
/// Frame identifier of the specific application-level error frame.
const TFI_ERROR: u8 = 0x7F;

/// Largest payload a normal information frame carries (LEN counts TFI too).
const MAX_PAYLOAD: usize = 254;

const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

/// HSU wake-up sequence. The 0x55 bytes pull the chip out of power-down and
/// the trailing zeros give its oscillator time to settle before the first
/// real frame; a chip that is already awake ignores all of it.
const WAKEUP: [u8; 16] = [
    0x55, 0x55, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Byte stream to and from the chip, with frame building and parsing.
pub struct Link<P> {
    pub(crate) port: P,
}

impl<P: Read + Write> Link<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Bring the chip out of power-down. Must precede the first command
    /// after power-up.
    pub fn wake(&mut self) -> Result<(), Error> {
        self.port.write_all(&WAKEUP)?;
        self.port.flush()?;
        Ok(())
    }

    /// Build and write one information frame carrying `payload`.
    pub fn send_frame(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLong(payload.len()));
        }

        let len = payload.len() as u8 + 1;
        let mut dcs = TFI_HOST;
        for byte in payload {
            dcs = dcs.wrapping_add(*byte);
        }

        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&[PREAMBLE, START_1, START_2]);
        frame.push(len);
        frame.push(len.wrapping_neg());
        frame.push(TFI_HOST);
        frame.extend_from_slice(payload);
        frame.push(dcs.wrapping_neg());
        frame.push(POSTAMBLE);

        trace!("tx {:02x?}", frame);
        self.port.write_all(&frame)?;
        self.port.flush()?;
        Ok(())
    }

    /// A host-to-chip ACK aborts whatever command is still in flight.
    pub fn send_ack(&mut self) -> Result<(), Error> {
        trace!("tx ack");
        self.port.write_all(&ACK_FRAME)?;
        self.port.flush()?;
        Ok(())
    }

    /// Wait for the ACK the chip sends after every accepted command frame.
    pub fn read_ack(&mut self, deadline: Instant) -> Result<(), Error> {
        self.seek_start(deadline, "ack frame")?;
        let len = self.read_byte(deadline, "ack frame")?;
        let lcs = self.read_byte(deadline, "ack frame")?;
        match (len, lcs) {
            (0x00, 0xFF) => Ok(()),
            (0xFF, 0x00) => Err(Error::Nack),
            _ => Err(Error::Frame("expected ack frame")),
        }
    }

    /// Wait for an information frame and return its payload (response code
    /// byte plus data, TFI stripped).
    pub fn read_response(&mut self, deadline: Instant) -> Result<Vec<u8>, Error> {
        self.seek_start(deadline, "response frame")?;
        let len = self.read_byte(deadline, "response frame")?;
        let lcs = self.read_byte(deadline, "response frame")?;
        match (len, lcs) {
            (0x00, 0xFF) => return Err(Error::Frame("ack where a response was expected")),
            (0xFF, 0x00) => return Err(Error::Nack),
            // Extended frames are only used for payloads beyond 255 bytes,
            // which none of the supported commands produce.
            (0xFF, 0xFF) => return Err(Error::Frame("extended frame")),
            _ => {}
        }
        if len.wrapping_add(lcs) != 0 {
            return Err(Error::Checksum);
        }
        if len == 0 {
            return Err(Error::Frame("empty information frame"));
        }

        let tfi = self.read_byte(deadline, "response frame")?;
        let mut payload = vec![0u8; len as usize - 1];
        for byte in payload.iter_mut() {
            *byte = self.read_byte(deadline, "response frame")?;
        }
        let dcs = self.read_byte(deadline, "response frame")?;

        let mut sum = tfi.wrapping_add(dcs);
        for byte in &payload {
            sum = sum.wrapping_add(*byte);
        }
        if sum != 0 {
            return Err(Error::Checksum);
        }

        trace!("rx {:02x?}", payload);
        match tfi {
            TFI_CHIP => Ok(payload),
            TFI_ERROR => Err(Error::ErrorFrame),
            _ => Err(Error::Frame("unexpected frame identifier")),
        }
    }

    /// Discard pending input, e.g. a stale response overtaken by an abort.
    pub fn drain(&mut self, deadline: Instant) {
        let mut buf = [0u8; 64];
        while Instant::now() < deadline {
            match self.port.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    /// Scan the stream for the `00 FF` start-of-frame sequence, skipping
    /// preamble and inter-frame noise.
    fn seek_start(&mut self, deadline: Instant, what: &'static str) -> Result<(), Error> {
        let mut last_was_zero = false;
        loop {
            let byte = self.read_byte(deadline, what)?;
            match byte {
                START_2 if last_was_zero => return Ok(()),
                0x00 => last_was_zero = true,
                _ => last_was_zero = false,
            }
        }
    }

    fn read_byte(&mut self, deadline: Instant, what: &'static str) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        loop {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(what));
            }
            match self.port.read(&mut buf) {
                Ok(0) => continue,
                Ok(_) => return Ok(buf[0]),
                Err(err)
                    if err.kind() == io::ErrorKind::TimedOut
                        || err.kind() == io::ErrorKind::WouldBlock =>
                {
                    continue;
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }
}
