//! End-to-end tests over the loopback interface.
//!
//! They need a raw socket (root or CAP_NET_RAW), so they are ignored by
//! default: `sudo -E cargo test -- --ignored`.

#![cfg(any(target_os = "linux", target_os = "android"))]

use std::time::Duration;

use ether_rs::io_loop::{self, IoConfig};
use ether_rs::{Device, Error, Ethertype, Frame, FrameFilter, Tagging};
use eui48::MacAddress;

const LOOPBACK: &str = "lo";
const SOURCE: [u8; 6] = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc];

fn wsmp_only() -> FrameFilter {
    Box::new(|frame: &Frame| frame.ethertype() == Ethertype::WSMP)
}

fn hello_frame(src: MacAddress) -> Frame {
    let payload = b"Hello, World!";
    let mut frame = Frame::new();
    frame.prepare(
        MacAddress::broadcast(),
        src,
        Tagging::NotTagged,
        Ethertype::WSMP,
        payload.len(),
    );
    frame.payload_mut().copy_from_slice(payload);
    frame
}

#[test]
#[ignore]
fn test_loopback_roundtrip() {
    let device = Device::open(LOOPBACK, Some(wsmp_only())).unwrap();
    assert_eq!(device.name(), LOOPBACK);
    assert!(device.mtu() > 0);
    let handle = io_loop::spawn(device, IoConfig::default()).unwrap();

    let frame = hello_frame(MacAddress::new(SOURCE));
    let sender = Device::open(LOOPBACK, None).unwrap();
    sender.write(&frame).unwrap();

    let received = handle.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received.frame.source(), &SOURCE);
    assert_eq!(received.frame.destination(), &[0xff; 6]);
    assert_eq!(received.frame.tagging(), Tagging::NotTagged);
    assert_eq!(received.frame.ethertype(), Ethertype::WSMP);
    assert_eq!(received.frame.payload(), b"Hello, World!");
    assert_eq!(received.frame.len(), 27);
}

#[test]
#[ignore]
fn test_loopback_skips_own_source() {
    let device = Device::open(LOOPBACK, Some(wsmp_only())).unwrap();
    let own = device.hardware_addr();
    let handle = io_loop::spawn(device, IoConfig::default()).unwrap();

    let sender = Device::open(LOOPBACK, None).unwrap();
    sender.write(&hello_frame(own)).unwrap();
    sender.write(&hello_frame(MacAddress::new(SOURCE))).unwrap();

    let received = handle.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received.frame.source(), &SOURCE);
}

#[test]
#[ignore]
fn test_loopback_rejects_oversized_and_closed() {
    let mut device = Device::open(LOOPBACK, None).unwrap();
    let oversized = vec![0u8; device.max_frame_size() + 1];
    assert!(matches!(
        device.write(&oversized),
        Err(Error::FrameTooLarge { .. })
    ));

    let writer = device.try_clone_writer().unwrap();
    device.close().unwrap();
    assert!(matches!(device.write(&hello_frame(MacAddress::new(SOURCE))), Err(Error::Closed)));
    writer.write(&hello_frame(MacAddress::new(SOURCE))).unwrap();
}

#[test]
fn test_open_rejects_invalid_names() {
    for name in ["", "this_name_is_too_long", "bad\0name"] {
        assert!(matches!(
            Device::open(name, None),
            Err(Error::InvalidInterfaceName(_))
        ));
    }
}
