//! Demultiplexing of BPF read buffers.
//!
//! One read from a BPF device returns a batch of records. Each record is a
//! `bpf_hdr` followed by the captured bytes, and the next record starts at
//! the word-aligned end of the previous one:
//!
//! ```text
//! | bpf_hdr | frame | pad | bpf_hdr | frame | pad | ...
//! ```
//!
//! The header layout depends on the platform, so it is a value here rather
//! than a `#[repr(C)]` struct. That keeps the parser testable everywhere.

use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::api::Result;
use crate::errors::Error;

/// caplen (4) + datalen (4) + hdrlen (2).
const LENGTH_FIELDS: usize = 10;

/// Layout of the `bpf_hdr` preceding each captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Bytes of the leading timestamp: two 4-byte or two 8-byte integers.
    timeval_len: usize,
    /// Record alignment (`BPF_ALIGNMENT`).
    word: usize,
}

impl HeaderLayout {
    /// `struct timeval32` timestamps, 4-byte alignment (macOS, iOS,
    /// 32-bit FreeBSD).
    pub const TIMEVAL32: HeaderLayout = HeaderLayout {
        timeval_len: 8,
        word: 4,
    };

    /// `struct timeval` with 64-bit fields, 8-byte alignment (64-bit FreeBSD).
    pub const TIMEVAL64: HeaderLayout = HeaderLayout {
        timeval_len: 16,
        word: 8,
    };

    /// `sizeof(struct bpf_hdr)`, trailing padding included.
    pub const fn header_size(&self) -> usize {
        self.word_align(self.timeval_len + LENGTH_FIELDS)
    }

    /// Rounds `len` up to the record alignment (`BPF_WORDALIGN`).
    pub const fn word_align(&self, len: usize) -> usize {
        (len + self.word - 1) & !(self.word - 1)
    }

    /// Decodes the header at the start of `buf`.
    ///
    /// Returns `None` if `buf` is too short to hold the header fields.
    pub fn decode(&self, buf: &[u8]) -> Option<RecordHeader> {
        if buf.len() < self.timeval_len + LENGTH_FIELDS {
            return None;
        }
        let (sec, usec) = if self.timeval_len == 8 {
            (
                i32::from_ne_bytes(buf[0..4].try_into().ok()?) as i64,
                i32::from_ne_bytes(buf[4..8].try_into().ok()?) as i64,
            )
        } else {
            (
                i64::from_ne_bytes(buf[0..8].try_into().ok()?),
                i64::from_ne_bytes(buf[8..16].try_into().ok()?),
            )
        };
        let t = self.timeval_len;
        Some(RecordHeader {
            time: timestamp(sec, usec),
            caplen: u32::from_ne_bytes(buf[t..t + 4].try_into().ok()?) as usize,
            datalen: u32::from_ne_bytes(buf[t + 4..t + 8].try_into().ok()?) as usize,
            hdrlen: u16::from_ne_bytes(buf[t + 8..t + 10].try_into().ok()?) as usize,
        })
    }

    fn min_hdrlen(&self) -> usize {
        self.timeval_len + LENGTH_FIELDS
    }
}

/// Header layout of the BPF implementation this crate is built for.
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    all(target_os = "freebsd", target_pointer_width = "32")
))]
pub const NATIVE: HeaderLayout = HeaderLayout::TIMEVAL32;
#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    all(target_os = "freebsd", target_pointer_width = "32")
)))]
pub const NATIVE: HeaderLayout = HeaderLayout::TIMEVAL64;

fn timestamp(sec: i64, usec: i64) -> SystemTime {
    if sec < 0 {
        return UNIX_EPOCH;
    }
    let since_epoch = Duration::from_secs(sec as u64) + Duration::from_micros(usec.max(0) as u64);
    UNIX_EPOCH.checked_add(since_epoch).unwrap_or(UNIX_EPOCH)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub time: SystemTime,
    /// Bytes captured and present in the buffer.
    pub caplen: usize,
    /// Length of the frame on the wire.
    pub datalen: usize,
    /// Offset from the start of the header to the captured bytes.
    pub hdrlen: usize,
}

/// One captured frame borrowed from a [`Batch`].
#[derive(Debug)]
pub struct Record<'a> {
    pub time: SystemTime,
    pub data: &'a [u8],
    pub original_len: usize,
}

/// A BPF read buffer and the cursor over the records it holds.
///
/// The cursor is single-consumer: draining needs `&mut self`.
pub struct Batch {
    buf: Vec<u8>,
    p: usize,
    n: usize,
    layout: HeaderLayout,
}

impl Batch {
    /// `len` must equal the device's buffer length (`BIOCGBLEN`); BPF rejects
    /// reads into smaller buffers.
    pub fn new(len: usize, layout: HeaderLayout) -> Self {
        Self {
            buf: vec![0; len],
            p: 0,
            n: 0,
            layout,
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    /// Replaces the batch with one read from `reader` and rewinds the cursor.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> Result<usize> {
        self.p = 0;
        self.n = 0;
        let n = reader.read(&mut self.buf)?;
        self.n = n;
        Ok(n)
    }

    /// True when every record of the current batch has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.p >= self.n
    }

    /// Returns the next record, or `None` once the batch is drained.
    ///
    /// A record whose header or data runs past the end of the batch yields
    /// [`Error::MalformedCapture`] and discards the rest of the batch.
    pub fn next_record(&mut self) -> Result<Option<Record<'_>>> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let offset = self.p;
        let header = match self.layout.decode(&self.buf[offset..self.n]) {
            Some(header) if header.hdrlen >= self.layout.min_hdrlen() => header,
            _ => return Err(self.malformed(offset)),
        };
        let Some(start) = offset.checked_add(header.hdrlen) else {
            return Err(self.malformed(offset));
        };
        let end = match start.checked_add(header.caplen) {
            Some(end) if end <= self.n => end,
            _ => return Err(self.malformed(offset)),
        };

        // The last record of a batch need not be padded.
        self.p = (offset + self.layout.word_align(header.hdrlen + header.caplen)).min(self.n);
        Ok(Some(Record {
            time: header.time,
            data: &self.buf[start..end],
            original_len: header.datalen,
        }))
    }

    fn malformed(&mut self, offset: usize) -> Error {
        self.p = self.n;
        Error::MalformedCapture { offset }
    }
}
