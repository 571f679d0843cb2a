//! Interface identity and receive admission.

use std::fmt;

use eui48::MacAddress;
use tracing::trace;

use super::Result;
use crate::errors::Error;
use crate::frame::Frame;

/// Bytes the kernel allows in an interface name, terminating NUL included.
pub const IFNAMSIZ: usize = 16;

/// Two addresses, the length/type field and up to 8 bytes of 802.1Q tags.
pub const FRAME_OVERHEAD: usize = 6 + 6 + 2 + 8;

/// Predicate deciding whether a received frame is delivered.
pub type FrameFilter = Box<dyn Fn(&Frame) -> bool + Send>;

/// Identity of the interface a device is bound to, resolved once at open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub hardware_addr: MacAddress,
    /// MAC layer MTU: payload bytes, headers excluded.
    pub mtu: usize,
}

impl Interface {
    /// Largest frame the device accepts or delivers.
    pub fn max_frame_size(&self) -> usize {
        self.mtu + FRAME_OVERHEAD
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (index {}, {}, mtu {})",
            self.name,
            self.index,
            self.hardware_addr.to_hex_string(),
            self.mtu
        )
    }
}

/// Options applied when a device is opened.
#[derive(Clone, Debug, Default)]
pub struct Flags {
    /// Also receive unicast frames addressed to other stations.
    pub promiscuous: bool,
}

/// Checks `name` and returns it as a NUL padded kernel interface name.
pub(crate) fn encode_name(name: &str) -> Result<[libc::c_char; IFNAMSIZ]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ || bytes.contains(&0) {
        return Err(Error::InvalidInterfaceName(name.to_string()));
    }
    let mut out = [0 as libc::c_char; IFNAMSIZ];
    for (dst, src) in out.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(out)
}

/// Receive-side policy shared by every backend.
///
/// Runt frames and frames carrying our own source address are always
/// dropped, whatever the filter says.
pub(crate) struct Admission {
    own_addr: MacAddress,
    filter: Option<FrameFilter>,
}

impl Admission {
    pub(crate) fn new(own_addr: MacAddress, filter: Option<FrameFilter>) -> Self {
        Self { own_addr, filter }
    }

    pub(crate) fn admits(&self, frame: &Frame) -> bool {
        if !frame.has_header() {
            trace!(len = frame.len(), "dropping runt frame");
            return false;
        }
        if frame.source()[..] == *self.own_addr.as_bytes() {
            trace!("dropping self-sent frame");
            return false;
        }
        match &self.filter {
            Some(filter) => filter(frame),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Ethertype, Tagging};

    const OWN: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

    fn frame_from(src: [u8; 6], ethertype: Ethertype) -> Frame {
        let mut frame = Frame::new();
        frame.prepare(
            MacAddress::broadcast(),
            MacAddress::new(src),
            Tagging::NotTagged,
            ethertype,
            4,
        );
        frame
    }

    #[test]
    fn test_encode_name() {
        let name = encode_name("eth0").unwrap();
        assert_eq!(name[..5], [b'e' as libc::c_char, b't' as _, b'h' as _, b'0' as _, 0]);

        assert!(matches!(encode_name(""), Err(Error::InvalidInterfaceName(_))));
        assert!(encode_name("fifteen_chars_x").is_ok());
        assert!(matches!(
            encode_name("sixteen_chars_xx"),
            Err(Error::InvalidInterfaceName(_))
        ));
        assert!(encode_name("et\0h0").is_err());
    }

    #[test]
    fn test_max_frame_size() {
        let iface = Interface {
            name: "eth0".into(),
            index: 2,
            hardware_addr: MacAddress::new(OWN),
            mtu: 1500,
        };
        assert_eq!(iface.max_frame_size(), 1522);
    }

    #[test]
    fn test_self_sent_dropped_even_with_accepting_filter() {
        let admission = Admission::new(MacAddress::new(OWN), Some(Box::new(|_: &Frame| true)));
        assert!(!admission.admits(&frame_from(OWN, Ethertype::IPV4)));
        assert!(admission.admits(&frame_from([0x02, 0, 0, 0, 0, 0x02], Ethertype::IPV4)));
    }

    #[test]
    fn test_filter_applied() {
        let admission = Admission::new(
            MacAddress::new(OWN),
            Some(Box::new(|frame: &Frame| frame.ethertype() == Ethertype::WSMP)),
        );
        let peer = [0x02, 0, 0, 0, 0, 0x02];
        assert!(admission.admits(&frame_from(peer, Ethertype::WSMP)));
        assert!(!admission.admits(&frame_from(peer, Ethertype::IPV4)));
    }

    #[test]
    fn test_runt_dropped() {
        let admission = Admission::new(MacAddress::new(OWN), None);
        assert!(!admission.admits(&Frame::from(vec![0xffu8; 13])));
    }
}
