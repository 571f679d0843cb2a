//! The platform device: one closed set of backends behind one type.

use eui48::MacAddress;
use tracing::debug;

use super::Result;
use super::interface::{Flags, FrameFilter, Interface};
use super::socket::{FrameWriter, Socket};
use crate::buffer_pool::TimestampedFrame;
use crate::frame::Frame;

#[cfg(any(target_os = "linux", target_os = "android"))]
type Backend = crate::af_packet::Sock;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
type Backend = crate::bpf::Sock;

type BackendWriter = <Backend as Socket>::Writer;

/// A raw Ethernet device bound to one interface.
///
/// Uses AF_PACKET on Linux and BPF on macOS, iOS and FreeBSD. Lifecycle is
/// `open → {read, write}* → close`. After [`close`](Device::close),
/// [`write`](Device::write) fails immediately. [`read`](Device::read) fails
/// immediately on AF_PACKET; on BPF it keeps returning frames already
/// buffered from the last kernel read, then fails.
///
/// Reading needs `&mut self`: the BPF batch cursor is single-consumer and is
/// not synchronized. Use one device per reading thread.
pub struct Device {
    inner: Backend,
}

impl Device {
    /// Opens `ifname` with default [`Flags`].
    ///
    /// `filter`, when given, decides which received frames are delivered.
    pub fn open(ifname: &str, filter: Option<FrameFilter>) -> Result<Self> {
        Self::open_with_flags(ifname, filter, Flags::default())
    }

    pub fn open_with_flags(
        ifname: &str,
        filter: Option<FrameFilter>,
        flags: Flags,
    ) -> Result<Self> {
        let inner = Backend::create(ifname, filter, &flags)?;
        debug!(interface = %inner.interface(), ?flags, "device opened");
        Ok(Self { inner })
    }

    #[cfg(test)]
    pub(crate) fn from_backend(inner: Backend) -> Self {
        Self { inner }
    }

    /// Reads one frame into `frame`.
    ///
    /// `frame` grows to the device's max frame size if needed and is resized
    /// to the received length. Blocks until a frame passes the filter.
    pub fn read(&mut self, frame: &mut Frame) -> Result<()> {
        self.inner.recv(frame).map(|_| ())
    }

    /// Like [`read`](Device::read), also recording the capture time.
    pub fn read_timestamped(&mut self, entry: &mut TimestampedFrame) -> Result<()> {
        entry.time = self.inner.recv(&mut entry.frame)?;
        Ok(())
    }

    /// Writes one frame: header and payload, no CRC.
    ///
    /// `frame` must be sized to the exact frame length; frames longer than
    /// [`max_frame_size`](Device::max_frame_size) are rejected unsent.
    pub fn write(&self, frame: &[u8]) -> Result<()> {
        self.inner.send(frame)
    }

    /// Duplicates the descriptor into a transmit handle usable from another
    /// thread. The handle stays usable after this device is closed.
    pub fn try_clone_writer(&self) -> Result<Writer> {
        Ok(Writer {
            inner: self.inner.try_clone_writer()?,
        })
    }

    pub fn interface(&self) -> &Interface {
        self.inner.interface()
    }

    /// Interface name, e.g. `eth0` or `en0`.
    pub fn name(&self) -> &str {
        &self.inner.interface().name
    }

    pub fn mtu(&self) -> usize {
        self.inner.interface().mtu
    }

    pub fn hardware_addr(&self) -> MacAddress {
        self.inner.interface().hardware_addr
    }

    pub fn max_frame_size(&self) -> usize {
        self.inner.interface().max_frame_size()
    }

    /// Closes the descriptor.
    pub fn close(&mut self) -> Result<()> {
        debug!(interface = %self.name(), "closing device");
        self.inner.close()
    }
}

/// Transmit-only handle obtained from [`Device::try_clone_writer`].
pub struct Writer {
    inner: BackendWriter,
}

impl Writer {
    pub fn write(&self, frame: &[u8]) -> Result<()> {
        self.inner.write(frame)
    }
}
