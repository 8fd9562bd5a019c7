//! Interactive MiFare Classic block writer.
//!
//! Walks the operator through placing a card, picking a block, entering up
//! to 16 bytes of content and confirming before anything touches the card.

use std::io::{self, Write as _};
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mifare_tools::{hex_string, list_ports, KeySlot};
use pn532_serial::{self as pn532, mifare, CardSession, Error, Key, Target, BLOCK_SIZE};

const DETECT_WINDOW: Duration = Duration::from_millis(500);

/// Blocks open to the operator. Sector 0 starts with the read-only
/// manufacturer block and is left alone entirely.
const WRITABLE_BLOCKS: std::ops::Range<u8> = 4..16;

#[derive(Debug, Parser)]
#[command(about = "Write one block of a MiFare Classic card")]
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

    println!("MiFare NFC Writer");
    println!();
    println!("== STEP 1 =========================");
    println!("Place the card to be written on the PN532...");
    let target = wait_for_card(&mut chip)?;
    println!();
    println!("Found card with UID: 0x{}", target.uid);
    println!();
    println!("==============================================================");
    println!("WARNING: DO NOT REMOVE CARD FROM PN532 UNTIL FINISHED WRITING!");
    println!("==============================================================");
    println!();

    println!("== STEP 2 =========================");
    println!("Now pick the block to write to the card.");
    let block = prompt_block()?;
    let data = prompt_payload()?;

    println!("== STEP 3 =========================");
    println!("Confirm you are ready to write to the card:");
    println!("Block: {block}");
    println!("Data:  0x{}", hex_string(&data));
    if mifare::is_sector_trailer(block) {
        println!("NOTE: block {block} is a sector trailer; bad access bits can lock the sector.");
    }
    if !confirm("Confirm card write (Y or N)? ")? {
        println!("Aborted!");
        return Ok(());
    }
    println!("Writing card (DO NOT REMOVE CARD FROM PN532)...");

    let mut session = CardSession::new(&mut chip, target);
    match session.write_block(block, args.key_slot.into(), &args.key, &data) {
        Ok(()) => {
            println!("Wrote card successfully! You may now remove the card from the PN532.");
            Ok(())
        }
        Err(Error::AuthRejected { .. }) => {
            eprintln!("Error! Failed to authenticate block {block} with the card.");
            process::exit(1);
        }
        Err(err) => {
            eprintln!("Error! Failed to write to the card: {err}");
            process::exit(1);
        }
    }
}

fn wait_for_card<P: io::Read + io::Write>(chip: &mut pn532::Pn532<P>) -> Result<Target, Error> {
    loop {
        if let Some(target) = chip.detect_target(DETECT_WINDOW)? {
            return Ok(target);
        }
    }
}

fn prompt_block() -> anyhow::Result<u8> {
    loop {
        println!();
        println!(
            "Type the number of the block to write ({}-{}).",
            WRITABLE_BLOCKS.start,
            WRITABLE_BLOCKS.end - 1
        );
        println!();
        let line = prompt("Enter choice: ")?;
        println!();
        match line.trim().parse::<u8>() {
            Ok(block) if WRITABLE_BLOCKS.contains(&block) => return Ok(block),
            Ok(_) => println!("Error! Unrecognized block."),
            Err(_) => println!("Error! Unrecognized option."),
        }
    }
}

fn prompt_payload() -> anyhow::Result<[u8; BLOCK_SIZE]> {
    loop {
        println!();
        println!("Type the value to write on the block (up to {BLOCK_SIZE} bytes).");
        println!();
        let line = prompt("Enter: ")?;
        println!();
        let bytes = line.as_bytes();
        if bytes.len() > BLOCK_SIZE {
            println!("Error! Value is longer than {BLOCK_SIZE} bytes.");
            continue;
        }
        let mut data = [0u8; BLOCK_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        println!("Info: {:?} size: {}", line, bytes.len());
        return Ok(data);
    }
}

fn confirm(label: &str) -> anyhow::Result<bool> {
    let answer = prompt(label)?.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Read one line from the operator, stripping only the line ending so
/// payload bytes keep their spaces.
fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin()
        .read_line(&mut line)
        .context("reading stdin")?
        == 0
    {
        anyhow::bail!("stdin closed");
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}
