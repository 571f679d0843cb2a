//! Sends Ethernet frames with a fixed payload.
//!
//! Example:
//! ```bash
//! sudo cargo run --example ether-send -- -i eth0 -n 10 --interval-ms 100
//! ```

mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use eui48::MacAddress;
use ether_rs::{Device, Ethertype, Frame, Tagging};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Network interface name (e.g. "eth0" | "en0").
    #[clap(short = 'i', long)]
    interface: String,

    /// Destination MAC address.
    #[clap(short, long, default_value = "ff:ff:ff:ff:ff:ff")]
    dst: String,

    /// Ethertype in hex.
    #[clap(short = 'e', long, default_value = "0x88dc", value_parser = common::parse_ethertype)]
    ethertype: u16,

    /// 802.1Q tags to leave room for (0, 1 or 2).
    #[clap(short, long, default_value_t = 0)]
    tags: u8,

    /// Payload text.
    #[clap(short, long, default_value = "Hello, World!")]
    payload: String,

    /// Frames to send (0 = until Ctrl+C).
    #[clap(short = 'n', long, default_value_t = 1)]
    count: u64,

    /// Pause between frames.
    #[clap(long, default_value_t = 1000)]
    interval_ms: u64,
}

fn main() -> Result<()> {
    common::init_logging();
    let args = Args::parse();
    let term = common::termination_flag()?;

    let dst = MacAddress::parse_str(&args.dst).map_err(|e| anyhow!("bad destination: {e}"))?;
    let tagging = match args.tags {
        0 => Tagging::NotTagged,
        1 => Tagging::Tagged,
        2 => Tagging::DoubleTagged,
        n => return Err(anyhow!("unsupported tag count {n}")),
    };

    let mut device = Device::open(&args.interface, None)?;
    info!(interface = %device.interface(), "sending");

    let mut frame = Frame::with_capacity(device.max_frame_size());
    frame.prepare(
        dst,
        device.hardware_addr(),
        tagging,
        Ethertype::from(args.ethertype),
        args.payload.len(),
    );
    frame.payload_mut().copy_from_slice(args.payload.as_bytes());

    let mut sent = 0u64;
    while !term.load(Ordering::SeqCst) && (args.count == 0 || sent < args.count) {
        match device.write(&frame) {
            Ok(()) => sent += 1,
            Err(e) => warn!(error = %e, "write failed"),
        }
        if args.count == 0 || sent < args.count {
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }
    info!(frames = sent, "done");
    device.close()?;
    Ok(())
}
