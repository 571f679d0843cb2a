//! Prints the Ethernet frames arriving on an interface.
//!
//! Example:
//! ```bash
//! sudo cargo run --example ether-dump -- -i eth0 --ethertype 0x88dc
//! ```

mod common;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::Ordering;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use clap::Parser;
use eui48::MacAddress;
use ether_rs::io_loop::{self, IoConfig};
use ether_rs::{Device, Ethertype, Flags, Frame, FrameFilter, TimestampedFrame};
use etherparse::{NetHeaders, PacketHeaders};
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Network interface name (e.g. "eth0" | "en0").
    #[clap(short = 'i', long)]
    interface: String,

    /// Only show frames with this ethertype (hex, e.g. 0x88dc).
    #[clap(short = 'e', long, value_parser = common::parse_ethertype)]
    ethertype: Option<u16>,

    /// Also capture unicast frames addressed to other stations.
    #[clap(short, long)]
    promiscuous: bool,

    /// Stop after this many frames (0 = unlimited).
    #[clap(short = 'n', long, default_value_t = 0)]
    count: u64,

    /// Frames buffered between the capture thread and the printer.
    #[clap(short, long, default_value_t = 64)]
    queue: usize,
}

fn describe_ip(frame: &[u8]) -> Result<String> {
    let headers = PacketHeaders::from_ethernet_slice(frame)?;
    match headers.net.ok_or(anyhow!("no IP header"))? {
        NetHeaders::Ipv4(hdr, _) => Ok(format!(
            "IP {} > {}",
            Ipv4Addr::from(hdr.source),
            Ipv4Addr::from(hdr.destination)
        )),
        NetHeaders::Ipv6(hdr, _) => Ok(format!(
            "IP6 {} > {}",
            Ipv6Addr::from(hdr.source),
            Ipv6Addr::from(hdr.destination)
        )),
        _ => Err(anyhow!("no IP header")),
    }
}

fn print_frame(entry: &TimestampedFrame) {
    let frame = &entry.frame;
    let time = entry.time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let mut line = format!(
        "{}.{:06} {} > {} {:?} {} len {}",
        time.as_secs(),
        time.subsec_micros(),
        MacAddress::new(*frame.source()).to_hex_string(),
        MacAddress::new(*frame.destination()).to_hex_string(),
        frame.tagging(),
        frame.ethertype(),
        frame.len()
    );
    if let Ok(ip) = describe_ip(frame) {
        line.push_str(": ");
        line.push_str(&ip);
    }
    println!("{line}");
}

fn main() -> Result<()> {
    common::init_logging();
    let args = Args::parse();
    let term = common::termination_flag()?;

    let filter = args.ethertype.map(|wanted| {
        let wanted = Ethertype::from(wanted);
        Box::new(move |frame: &Frame| frame.ethertype() == wanted) as FrameFilter
    });
    let flags = Flags {
        promiscuous: args.promiscuous,
    };
    let device = Device::open_with_flags(&args.interface, filter, flags)?;
    info!(interface = %device.interface(), "capturing");

    let config = IoConfig {
        queue_capacity: args.queue,
        ..IoConfig::default()
    };
    let handle = io_loop::spawn(device, config)?;

    let mut seen = 0u64;
    while !term.load(Ordering::SeqCst) {
        let Some(entry) = handle.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        print_frame(&entry);
        handle.recycle(entry);
        seen += 1;
        if args.count != 0 && seen == args.count {
            break;
        }
    }
    info!(frames = seen, "done");
    Ok(())
}
