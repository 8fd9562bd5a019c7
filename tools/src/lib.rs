//! Bits shared by the `readmifare` and `writemifare` binaries.

use anyhow::Context;
use clap::ValueEnum;
use pn532_serial::KeyType;

/// Key slot selector as exposed on the command line.
#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum KeySlot {
    A,
    B,
}

impl From<KeySlot> for KeyType {
    fn from(slot: KeySlot) -> Self {
        match slot {
            KeySlot::A => KeyType::A,
            KeySlot::B => KeyType::B,
        }
    }
}

/// Render `bytes` as contiguous lowercase hex.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Render a block as text, dotting out non-printable bytes.
pub fn printable_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
        .collect()
}

/// Print the serial devices on this machine and return.
pub fn list_ports() -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    println!("List of available serial ports:");
    for port in ports {
        println!("- {}", port.port_name);
    }
    Ok(())
}
