//! Detect MiFare Classic cards and dump their blocks.
//!
//! Waits for a card on the reader, prints its UID and type, then
//! authenticates and reads the first 16 blocks with the given key.
//! Runs until interrupted.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use log::info;
use mifare_tools::{hex_string, list_ports, printable_ascii, KeySlot};
use pn532_serial::{self as pn532, CardSession, Error, Key, TagType};

/// Poll window per detection attempt; short enough that Ctrl-C feels
/// immediate between attempts.
const DETECT_WINDOW: Duration = Duration::from_millis(500);
/// Retry budget for a single block before giving up on it.
const BLOCK_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(about = "Detect MiFare Classic cards and dump their blocks")]
struct Args {
    /// List available serial ports and exit
    #[arg(short, long)]
    list_ports: bool,
    /// Serial device the PN532 is attached to
    #[arg(short, long, default_value_t = String::from("/dev/ttyUSB0"))]
    port: String,
    #[arg(short, long, default_value_t = pn532::DEFAULT_BAUD_RATE)]
    baudrate: u32,
    /// Authentication key, 12 hex digits
    #[arg(short, long, default_value = "ffffffffffff")]
    key: Key,
    /// Key slot to authenticate against
    #[arg(long, value_enum, default_value_t = KeySlot::B)]
    key_slot: KeySlot,
    /// Number of blocks to dump per card
    #[arg(long, default_value_t = 16)]
    blocks: u8,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.list_ports {
        return list_ports();
    }

    let mut chip = pn532::open(&args.port, args.baudrate)
        .with_context(|| format!("opening {}", args.port))?;
    chip.wake().context("waking the chip")?;
    chip.sam_configuration().context("SAM configuration")?;
    let version = chip
        .firmware_version()
        .context("querying firmware version")?;
    println!("Found PN532 with firmware version: {version}");

    println!("Waiting for MiFare card...");
    loop {
        let Some(target) = chip.detect_target(DETECT_WINDOW)? else {
            continue;
        };
        println!("Found card with UID: 0x{}", target.uid);

        let tag_type = target.tag_type();
        if !matches!(tag_type, TagType::MifareClassic1k | TagType::MifareClassic4k) {
            info!("not a MiFare Classic card ({tag_type}), skipping");
            continue;
        }

        dump_blocks(&mut chip, target, &args);
        println!("Waiting for MiFare card...");
    }
}

fn dump_blocks<P: Read + Write>(chip: &mut pn532::Pn532<P>, target: pn532::Target, args: &Args) {
    let mut session = CardSession::new(chip, target);
    for block in 0..args.blocks {
        let deadline = Instant::now() + BLOCK_DEADLINE;
        match session.read_block(block, args.key_slot.into(), &args.key, deadline) {
            Ok(data) => println!(
                "Read block {block:2} - 0x{} - {}",
                hex_string(&data),
                printable_ascii(&data)
            ),
            Err(Error::AuthRejected { .. }) => {
                println!("Failed to authenticate block {block}");
                break;
            }
            Err(err) => {
                println!("Failed to read block {block}: {err}");
            }
        }
    }
}
