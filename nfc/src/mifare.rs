//! MiFare Classic block access on top of the chip operations.
//!
//! Classic cards group blocks into sectors of four; authenticating any block
//! of a sector unlocks the whole sector until the card leaves the field or a
//! command fails. [`CardSession`] tracks that so consecutive reads inside one
//! sector authenticate once.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::time::Instant;

use log::warn;

use crate::chip::Pn532;
use crate::error::Error;
use crate::tag::Target;

/// MiFare Classic command bytes carried inside InDataExchange.
pub(crate) const MIFARE_CMD_AUTH_A: u8 = 0x60;
pub(crate) const MIFARE_CMD_AUTH_B: u8 = 0x61;
pub(crate) const MIFARE_CMD_READ: u8 = 0x30;
pub(crate) const MIFARE_CMD_WRITE: u8 = 0xA0;

pub const BLOCK_SIZE: usize = 16;
pub const BLOCKS_PER_SECTOR: u8 = 4;

/// The last block of every sector holds the sector keys and access bits.
pub fn is_sector_trailer(block: u8) -> bool {
    block % BLOCKS_PER_SECTOR == BLOCKS_PER_SECTOR - 1
}

/// Which of the two sector keys to authenticate against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    A,
    B,
}

impl KeyType {
    pub(crate) fn command_byte(self) -> u8 {
        match self {
            KeyType::A => MIFARE_CMD_AUTH_A,
            KeyType::B => MIFARE_CMD_AUTH_B,
        }
    }
}

/// A 6-byte sector key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Key([u8; 6]);

impl Key {
    /// Transport key blank cards ship with.
    pub const DEFAULT: Key = Key([0xFF; 6]);

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for Key {
    fn from(bytes: [u8; 6]) -> Self {
        Key(bytes)
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 12 || !s.is_ascii() {
            return Err(format!("key must be 12 hex digits, got {s:?}"));
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| format!("invalid hex in key: {s:?}"))?;
        }
        Ok(Key(bytes))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Block access against one detected card.
pub struct CardSession<'a, P> {
    chip: &'a mut Pn532<P>,
    target: Target,
    authenticated_sector: Option<u8>,
}

impl<'a, P: Read + Write> CardSession<'a, P> {
    pub fn new(chip: &'a mut Pn532<P>, target: Target) -> Self {
        Self {
            chip,
            target,
            authenticated_sector: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Authenticate (once per sector) and read `block`, retrying transient
    /// chip errors until `deadline`. A rejected authentication is terminal:
    /// the key is wrong and will stay wrong.
    pub fn read_block(
        &mut self,
        block: u8,
        key_type: KeyType,
        key: &Key,
        deadline: Instant,
    ) -> Result<[u8; BLOCK_SIZE], Error> {
        loop {
            let attempt = self
                .authenticate_if_needed(block, key_type, key)
                .and_then(|()| self.chip.mifare_read_block(block));
            match attempt {
                Ok(data) => return Ok(data),
                Err(err) if err.is_transient() && Instant::now() < deadline => {
                    warn!("error during read of block {block}, retrying: {err}");
                    self.authenticated_sector = None;
                }
                Err(err) => {
                    self.authenticated_sector = None;
                    return Err(err);
                }
            }
        }
    }

    /// Authenticate and write `block`. Writes are never retried; a second
    /// attempt against a half-programmed block has been seen to brick tags.
    pub fn write_block(
        &mut self,
        block: u8,
        key_type: KeyType,
        key: &Key,
        data: &[u8; BLOCK_SIZE],
    ) -> Result<(), Error> {
        self.authenticate_if_needed(block, key_type, key)?;
        match self.chip.mifare_write_block(block, data) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.authenticated_sector = None;
                Err(err)
            }
        }
    }

    fn authenticate_if_needed(
        &mut self,
        block: u8,
        key_type: KeyType,
        key: &Key,
    ) -> Result<(), Error> {
        let sector = block / BLOCKS_PER_SECTOR;
        if self.authenticated_sector == Some(sector) {
            return Ok(());
        }
        self.chip
            .mifare_authenticate(&self.target.uid, block, key_type, key)?;
        self.authenticated_sector = Some(sector);
        Ok(())
    }
}
