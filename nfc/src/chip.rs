//! Command layer: one request / ACK / response exchange per operation.

use std::fmt;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, STATUS_MIFARE_AUTH};
use crate::link::Link;
use crate::mifare::{Key, KeyType, MIFARE_CMD_READ, MIFARE_CMD_WRITE};
use crate::tag::{Target, Uid};

/// PN532 host command bytes (UM0701-02 chapter 7).
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Diagnose = 0x00,
    GetFirmwareVersion = 0x02,
    GetGeneralStatus = 0x04,
    ReadRegister = 0x06,
    WriteRegister = 0x08,
    ReadGpio = 0x0C,
    WriteGpio = 0x0E,
    SetSerialBaudRate = 0x10,
    SetParameters = 0x12,
    SamConfiguration = 0x14,
    PowerDown = 0x16,
    RfConfiguration = 0x32,
    InJumpForDep = 0x56,
    InJumpForPsl = 0x46,
    InListPassiveTarget = 0x4A,
    InAtr = 0x50,
    InPsl = 0x4E,
    InDataExchange = 0x40,
    InCommunicateThru = 0x42,
    InDeselect = 0x44,
    InRelease = 0x52,
    InSelect = 0x54,
    TgInitAsTarget = 0x8C,
    TgGetData = 0x86,
    TgSetData = 0x8E,
}

/// 106 kbps ISO 14443 type A, the modulation MiFare cards use.
const BAUD_MOD_ISO14443A: u8 = 0x00;

/// Inlist at most one card per poll.
const MAX_TARGETS: u8 = 0x01;

/// Logical target number used in InDataExchange; only one card is ever
/// inlisted at a time.
const TARGET_1: u8 = 0x01;

/// The ACK must follow a command frame almost immediately.
const ACK_TIMEOUT: Duration = Duration::from_millis(500);
/// Response window for everything except card-detection polls.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub ver: u8,
    pub rev: u8,
    pub support: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ver, self.rev)
    }
}

/// A PN532 on the other end of a byte stream.
pub struct Pn532<P> {
    pub(crate) link: Link<P>,
}

impl<P: Read + Write> Pn532<P> {
    pub fn new(port: P) -> Self {
        Self {
            link: Link::new(port),
        }
    }

    /// Bring the chip out of power-down before the first command.
    pub fn wake(&mut self) -> Result<(), Error> {
        self.link.wake()
    }

    /// Configure the SAM for normal operation: no secure access module in
    /// the signal path, 1 s virtual-card timeout, IRQ pin driven. Same
    /// parameter bytes the serial breakout drivers use.
    pub fn sam_configuration(&mut self) -> Result<(), Error> {
        self.call(Command::SamConfiguration, &[0x01, 0x14, 0x01], RESPONSE_TIMEOUT)?;
        Ok(())
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, Error> {
        let data = self.call(Command::GetFirmwareVersion, &[], RESPONSE_TIMEOUT)?;
        if data.len() < 4 {
            return Err(Error::Frame("short GetFirmwareVersion response"));
        }
        Ok(FirmwareVersion {
            ic: data[0],
            ver: data[1],
            rev: data[2],
            support: data[3],
        })
    }

    /// Poll for a single type A target. Returns `Ok(None)` when nothing
    /// entered the field within `timeout`; the in-flight poll is aborted so
    /// the next command starts clean.
    pub fn detect_target(&mut self, timeout: Duration) -> Result<Option<Target>, Error> {
        match self.call(
            Command::InListPassiveTarget,
            &[MAX_TARGETS, BAUD_MOD_ISO14443A],
            timeout,
        ) {
            Ok(data) => Target::from_inlist_response(&data),
            Err(Error::Timeout(_)) => {
                // The chip keeps listening until a card shows up. Abort the
                // command, then swallow a response that raced the abort.
                self.link.send_ack()?;
                self.link.drain(Instant::now() + Duration::from_millis(20));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Authenticate `block` with one of the card's sector keys. The UID of
    /// the inlisted card is part of the authentication handshake.
    pub fn mifare_authenticate(
        &mut self,
        uid: &Uid,
        block: u8,
        key_type: KeyType,
        key: &Key,
    ) -> Result<(), Error> {
        let uid = uid.as_bytes();
        let mut args = Vec::with_capacity(3 + 6 + uid.len());
        args.push(TARGET_1);
        args.push(key_type.command_byte());
        args.push(block);
        args.extend_from_slice(key.as_bytes());
        args.extend_from_slice(uid);
        let data = self.call(Command::InDataExchange, &args, RESPONSE_TIMEOUT)?;
        exchange_status(&data, block)
    }

    /// Read one 16-byte block. The block's sector must be authenticated.
    pub fn mifare_read_block(&mut self, block: u8) -> Result<[u8; 16], Error> {
        let data = self.call(
            Command::InDataExchange,
            &[TARGET_1, MIFARE_CMD_READ, block],
            RESPONSE_TIMEOUT,
        )?;
        exchange_status(&data, block)?;
        let Some(bytes) = data.get(1..17) else {
            return Err(Error::Frame("short block read response"));
        };
        let mut out = [0u8; 16];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Write one 16-byte block. The block's sector must be authenticated.
    pub fn mifare_write_block(&mut self, block: u8, data: &[u8; 16]) -> Result<(), Error> {
        let mut args = Vec::with_capacity(3 + data.len());
        args.push(TARGET_1);
        args.push(MIFARE_CMD_WRITE);
        args.push(block);
        args.extend_from_slice(data);
        let response = self.call(Command::InDataExchange, &args, RESPONSE_TIMEOUT)?;
        exchange_status(&response, block)
    }

    /// Issue one command frame, consume the ACK, return the response data
    /// after checking the response code against the command byte.
    fn call(
        &mut self,
        command: Command,
        args: &[u8],
        response_timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(command as u8);
        payload.extend_from_slice(args);

        self.link.send_frame(&payload)?;
        self.link.read_ack(Instant::now() + ACK_TIMEOUT)?;
        let response = self.link.read_response(Instant::now() + response_timeout)?;

        let expected = command as u8 + 1;
        match response.split_first() {
            Some((&code, data)) if code == expected => {
                debug!("{command:?} -> {} data bytes", data.len());
                Ok(data.to_vec())
            }
            Some((&code, _)) => Err(Error::ResponseMismatch {
                sent: command as u8,
                got: code,
            }),
            None => Err(Error::Frame("empty response payload")),
        }
    }
}

/// InDataExchange prefixes its data with a status byte; 0x00 is success.
fn exchange_status(data: &[u8], block: u8) -> Result<(), Error> {
    match data.first() {
        Some(0x00) => Ok(()),
        Some(&STATUS_MIFARE_AUTH) => Err(Error::AuthRejected { block }),
        Some(&status) => Err(Error::Status { status, block }),
        None => Err(Error::Frame("missing status byte")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPort;

    fn chip_with(script: impl FnOnce(&mut MockPort)) -> Pn532<MockPort> {
        let mut port = MockPort::new();
        script(&mut port);
        Pn532::new(port)
    }

    #[test]
    fn firmware_version_is_parsed() {
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[0x03, 0x32, 0x01, 0x06, 0x07]);
        });
        let version = chip.firmware_version().unwrap();
        assert_eq!(version.ic, 0x32);
        assert_eq!(version.to_string(), "1.6");
    }

    #[test]
    fn sam_configuration_round_trip() {
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[0x15]);
        });
        chip.sam_configuration().unwrap();
        assert_eq!(
            chip.link.port.sent_payloads(),
            [[0x14, 0x01, 0x14, 0x01].to_vec()]
        );
    }

    #[test]
    fn response_code_mismatch_is_detected() {
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[0x15]);
        });
        assert!(matches!(
            chip.firmware_version(),
            Err(Error::ResponseMismatch { sent: 0x02, got: 0x15 })
        ));
    }

    #[test]
    fn detect_returns_target() {
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[
                0x4B, 0x01, 0x01, 0x00, 0x04, 0x08, 0x04, 0xDE, 0xAD, 0xBE, 0xEF,
            ]);
        });
        let target = chip
            .detect_target(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(target.uid.as_bytes(), [0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(target.sak, 0x08);
    }

    #[test]
    fn detect_without_card_aborts_the_poll() {
        let mut chip = chip_with(|port| {
            port.queue_ack();
            // no response: the card never shows up
        });
        let target = chip.detect_target(Duration::from_millis(20)).unwrap();
        assert!(target.is_none());
        // poll command, then the abort ACK
        assert!(chip.link.port.outgoing.ends_with(&[0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00]));
    }

    #[test]
    fn authenticate_sends_key_and_uid() {
        let uid = Uid::try_from([0xDE, 0xAD, 0xBE, 0xEF].as_slice()).unwrap();
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[0x41, 0x00]);
        });
        chip.mifare_authenticate(&uid, 4, KeyType::B, &Key::DEFAULT)
            .unwrap();
        assert_eq!(
            chip.link.port.sent_payloads(),
            [vec![
                0x40, 0x01, 0x61, 0x04, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xDE, 0xAD, 0xBE,
                0xEF,
            ]]
        );
    }

    #[test]
    fn rejected_authentication_is_terminal() {
        let uid = Uid::try_from([0xDE, 0xAD, 0xBE, 0xEF].as_slice()).unwrap();
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[0x41, 0x14]);
        });
        let err = chip
            .mifare_authenticate(&uid, 7, KeyType::A, &Key::DEFAULT)
            .unwrap_err();
        assert!(matches!(err, Error::AuthRejected { block: 7 }));
        assert!(!err.is_transient());
    }

    #[test]
    fn block_read_returns_contents() {
        let mut contents = vec![0x41, 0x00];
        contents.extend(0u8..16);
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&contents);
        });
        let block = chip.mifare_read_block(5).unwrap();
        assert_eq!(block[0], 0);
        assert_eq!(block[15], 15);
    }

    #[test]
    fn chip_status_maps_to_error() {
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[0x41, 0x27]);
        });
        let err = chip.mifare_read_block(5).unwrap_err();
        assert!(matches!(err, Error::Status { status: 0x27, block: 5 }));
        assert!(err.is_transient());
    }

    #[test]
    fn block_write_carries_all_sixteen_bytes() {
        let mut chip = chip_with(|port| {
            port.queue_ack();
            port.queue_response(&[0x41, 0x00]);
        });
        chip.mifare_write_block(6, &[0xAB; 16]).unwrap();
        let sent = chip.link.port.sent_payloads();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][..3], [0x40, 0x01, 0xA0]);
        assert_eq!(sent[0][3], 6);
        assert_eq!(&sent[0][4..], &[0xAB; 16]);
    }
}
