//! Ethernet II frame codec.
//!
//! A [`Frame`] is an owned byte buffer holding one link-layer frame without
//! the trailing CRC:
//!
//! ```text
//! [6 destination][6 source][0|4|8 tag][2 ethertype][payload ...]
//! ```
//!
//! All accessors are zero-copy views into the buffer.

use std::fmt;
use std::ops::{Deref, DerefMut};

use eui48::MacAddress;

use crate::api::Result;
use crate::errors::Error;

/// Length of the untagged header: two addresses and the ethertype.
pub const HEADER_LEN: usize = 14;

const TAG_OFFSET: usize = 12;
const TPID_SINGLE: [u8; 2] = [0x81, 0x00];
const TPID_DOUBLE: [u8; 2] = [0x88, 0xa8];

/// Whether and how a frame carries 802.1Q tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Tagging {
    #[default]
    NotTagged,
    /// One 802.1Q tag, 4 bytes.
    Tagged,
    /// 802.1ad outer tag plus inner tag, 8 bytes.
    DoubleTagged,
}

impl Tagging {
    /// Number of bytes taken by the tag(s).
    pub const fn size(self) -> usize {
        match self {
            Tagging::NotTagged => 0,
            Tagging::Tagged => 4,
            Tagging::DoubleTagged => 8,
        }
    }

    /// Full header length for this tagging, ethertype included.
    pub const fn header_len(self) -> usize {
        HEADER_LEN + self.size()
    }

    fn from_marker(marker: [u8; 2]) -> Self {
        match marker {
            TPID_SINGLE => Tagging::Tagged,
            TPID_DOUBLE => Tagging::DoubleTagged,
            _ => Tagging::NotTagged,
        }
    }

    fn marker(self) -> Option<[u8; 2]> {
        match self {
            Tagging::NotTagged => None,
            Tagging::Tagged => Some(TPID_SINGLE),
            Tagging::DoubleTagged => Some(TPID_DOUBLE),
        }
    }
}

/// The two-byte ethertype field, in network byte order.
///
/// No semantic validation is done on the value.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Ethertype(pub [u8; 2]);

impl Ethertype {
    pub const IPV4: Ethertype = Ethertype([0x08, 0x00]);
    pub const ARP: Ethertype = Ethertype([0x08, 0x06]);
    pub const WAKE_ON_LAN: Ethertype = Ethertype([0x08, 0x42]);
    pub const TRILL: Ethertype = Ethertype([0x22, 0xf3]);
    pub const RARP: Ethertype = Ethertype([0x80, 0x35]);
    pub const VLAN: Ethertype = Ethertype(TPID_SINGLE);
    pub const QINQ: Ethertype = Ethertype(TPID_DOUBLE);
    pub const IPV6: Ethertype = Ethertype([0x86, 0xdd]);
    pub const FLOW_CONTROL: Ethertype = Ethertype([0x88, 0x08]);
    pub const MPLS_UNICAST: Ethertype = Ethertype([0x88, 0x47]);
    pub const MPLS_MULTICAST: Ethertype = Ethertype([0x88, 0x48]);
    pub const PPPOE_DISCOVERY: Ethertype = Ethertype([0x88, 0x63]);
    pub const PPPOE_SESSION: Ethertype = Ethertype([0x88, 0x64]);
    pub const EAPOL: Ethertype = Ethertype([0x88, 0x8e]);
    pub const LLDP: Ethertype = Ethertype([0x88, 0xcc]);
    /// IEEE 1609.3 WAVE short message protocol.
    pub const WSMP: Ethertype = Ethertype([0x88, 0xdc]);
    pub const MACSEC: Ethertype = Ethertype([0x88, 0xe5]);
    pub const PTP: Ethertype = Ethertype([0x88, 0xf7]);
    pub const CFM: Ethertype = Ethertype([0x89, 0x02]);
    pub const FCOE: Ethertype = Ethertype([0x89, 0x06]);
    pub const ROCE: Ethertype = Ethertype([0x89, 0x15]);

    pub const fn as_u16(self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

impl From<u16> for Ethertype {
    fn from(value: u16) -> Self {
        Ethertype(value.to_be_bytes())
    }
}

impl From<Ethertype> for u16 {
    fn from(value: Ethertype) -> u16 {
        value.as_u16()
    }
}

impl fmt::Debug for Ethertype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ethertype({:#06x})", self.as_u16())
    }
}

impl fmt::Display for Ethertype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.as_u16())
    }
}

/// Fills the Ethernet header at the start of `buf` and returns its length.
///
/// Writes the destination, the source, the tag protocol identifier when
/// tagged, and the ethertype. The tag control bytes are left untouched for the
/// caller to fill through [`Frame::tag_mut`]. `buf` is never resized: sizing
/// the buffer for the payload is the caller's job. If `buf` is shorter than the
/// header, nothing is written and [`Error::BufferTooSmall`] is returned.
pub fn fill_header(
    buf: &mut [u8],
    dst: MacAddress,
    src: MacAddress,
    tagging: Tagging,
    ethertype: Ethertype,
) -> Result<usize> {
    let required = tagging.header_len();
    if buf.len() < required {
        return Err(Error::BufferTooSmall {
            len: buf.len(),
            required,
        });
    }
    write_header(buf, dst, src, tagging, ethertype);
    Ok(required)
}

fn write_header(
    buf: &mut [u8],
    dst: MacAddress,
    src: MacAddress,
    tagging: Tagging,
    ethertype: Ethertype,
) {
    buf[..6].copy_from_slice(dst.as_bytes());
    buf[6..TAG_OFFSET].copy_from_slice(src.as_bytes());
    if let Some(marker) = tagging.marker() {
        buf[TAG_OFFSET..TAG_OFFSET + 2].copy_from_slice(&marker);
    }
    let at = TAG_OFFSET + tagging.size();
    buf[at..at + 2].copy_from_slice(&ethertype.0);
}

fn mac_view(bytes: &[u8]) -> &[u8; 6] {
    bytes.try_into().expect("hardware address view is six bytes")
}

/// One Ethernet frame.
///
/// Accessors require at least a full header to be present.
///
/// # Panics
///
/// [`destination`](Frame::destination), [`source`](Frame::source),
/// [`tagging`](Frame::tagging), [`tag`](Frame::tag),
/// [`ethertype`](Frame::ethertype) and [`payload`](Frame::payload) panic when
/// the buffer is shorter than the header. Use [`has_header`](Frame::has_header)
/// to check first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Resizes the frame to hold the header plus `payload_len` bytes and fills
    /// the header. Payload bytes are zeroed only where the frame grew.
    pub fn prepare(
        &mut self,
        dst: MacAddress,
        src: MacAddress,
        tagging: Tagging,
        ethertype: Ethertype,
        payload_len: usize,
    ) {
        self.0.resize(tagging.header_len() + payload_len, 0);
        write_header(&mut self.0, dst, src, tagging, ethertype);
    }

    /// Whether the buffer holds a complete header, tags included.
    pub fn has_header(&self) -> bool {
        self.0.len() >= HEADER_LEN && self.0.len() >= self.tagging().header_len()
    }

    pub fn destination(&self) -> &[u8; 6] {
        mac_view(&self.0[..6])
    }

    pub fn source(&self) -> &[u8; 6] {
        mac_view(&self.0[6..TAG_OFFSET])
    }

    pub fn tagging(&self) -> Tagging {
        Tagging::from_marker([self.0[TAG_OFFSET], self.0[TAG_OFFSET + 1]])
    }

    /// The tag bytes, empty when the frame is not tagged.
    pub fn tag(&self) -> &[u8] {
        let size = self.tagging().size();
        &self.0[TAG_OFFSET..TAG_OFFSET + size]
    }

    pub fn tag_mut(&mut self) -> &mut [u8] {
        let size = self.tagging().size();
        &mut self.0[TAG_OFFSET..TAG_OFFSET + size]
    }

    pub fn ethertype(&self) -> Ethertype {
        let at = TAG_OFFSET + self.tagging().size();
        Ethertype([self.0[at], self.0[at + 1]])
    }

    pub fn payload(&self) -> &[u8] {
        let start = self.tagging().header_len();
        &self.0[start..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.tagging().header_len();
        &mut self.0[start..]
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn resize(&mut self, len: usize) {
        self.0.resize(len, 0);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Grows the backing storage so that `capacity() >= size` and sets the
    /// length to the full capacity, ready to be filled by a receive call.
    pub(crate) fn expose_capacity(&mut self, size: usize) -> &mut [u8] {
        if self.0.capacity() < size {
            self.0.reserve(size - self.0.len());
        }
        let cap = self.0.capacity();
        self.0.resize(cap, 0);
        &mut self.0
    }

    /// Replaces the contents with `bytes`, reusing the allocation.
    #[cfg(any(test, target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    pub(crate) fn set_contents(&mut self, bytes: &[u8]) {
        self.0.clear();
        self.0.extend_from_slice(bytes);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Frame {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Frame {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}
