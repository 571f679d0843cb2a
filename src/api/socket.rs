//! Backend contract.

use std::time::SystemTime;

use super::Result;
use super::interface::{Flags, FrameFilter, Interface};
use crate::frame::Frame;

/// A kernel facility that can send and receive raw frames on one interface.
///
/// Each backend (AF_PACKET, BPF) implements this trait. Exactly one backend
/// is compiled per target and wrapped by [`Device`](super::Device).
pub trait Socket: Send + Sized {
    /// Transmit-only handle sharing the interface binding.
    type Writer: FrameWriter;

    /// Opens the backend on `ifname`, performing all interface configuration
    /// up front. Nothing is returned on failure.
    fn create(ifname: &str, filter: Option<FrameFilter>, flags: &Flags) -> Result<Self>;

    fn interface(&self) -> &Interface;

    /// Receives the next admitted frame into `frame`, resized to the received
    /// length, and returns its capture time.
    ///
    /// Frames sent by this interface and frames rejected by the filter are
    /// skipped silently.
    fn recv(&mut self, frame: &mut Frame) -> Result<SystemTime>;

    /// Sends one complete frame, header included, CRC excluded.
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Duplicates the descriptor into an independent transmit handle.
    fn try_clone_writer(&self) -> Result<Self::Writer>;

    /// Releases the descriptor. Further sends fail.
    fn close(&mut self) -> Result<()>;
}

/// Transmit half obtained from [`Socket::try_clone_writer`].
pub trait FrameWriter: Send + 'static {
    fn write(&self, frame: &[u8]) -> Result<()>;
}
