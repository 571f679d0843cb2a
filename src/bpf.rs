//! BPF capture device backend (macOS, iOS, FreeBSD).
//!
//! A read returns a whole batch of records (see [`crate::capture`]); frames
//! are handed out from that batch one at a time before the next read.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::time::SystemTime;

use eui48::MacAddress;
use libc::{c_char, c_uint};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};
use tracing::{debug, trace, warn};

use crate::api::{
    self, Admission, Flags, FrameFilter, FrameWriter, IFNAMSIZ, Interface, Result, Socket,
};
use crate::capture::{self, Batch};
use crate::errors::Error;
use crate::frame::Frame;

/// Units tried after the FreeBSD cloning device.
const MAX_BPF_UNITS: usize = 99;

/// `struct ifreq`: the name followed by a 16 byte union.
#[repr(C)]
struct IfReq {
    name: [c_char; IFNAMSIZ],
    data: [u8; 16],
}

impl IfReq {
    fn new(name: [c_char; IFNAMSIZ]) -> Self {
        Self { name, data: [0; 16] }
    }
}

nix::ioctl_read!(biocgblen, b'B', 102, c_uint);
nix::ioctl_none!(biocpromisc, b'B', 105);
nix::ioctl_write_ptr!(biocsetif, b'B', 108, IfReq);
nix::ioctl_write_ptr!(biocimmediate, b'B', 112, c_uint);
nix::ioctl_write_ptr!(biocshdrcmplt, b'B', 117, c_uint);
nix::ioctl_readwrite!(siocgifmtu, b'i', 51, IfReq);

fn open_device() -> Result<File> {
    let open = |path: &str| OpenOptions::new().read(true).write(true).open(path);

    let mut last_err = match open("/dev/bpf") {
        Ok(file) => return Ok(file),
        Err(e) => e,
    };
    for unit in 0..MAX_BPF_UNITS {
        match open(&format!("/dev/bpf{unit}")) {
            Ok(file) => {
                trace!(unit, "opened capture device");
                return Ok(file);
            }
            Err(e) => last_err = e,
        }
    }
    Err(Error::NoCaptureDevice(last_err))
}

/// Binds the device, enables immediate mode and returns the read buffer length.
fn configure(fd: RawFd, name: [c_char; IFNAMSIZ], flags: &Flags) -> Result<usize> {
    let ifr = IfReq::new(name);
    unsafe { biocsetif(fd, &ifr) }.map_err(|e| Error::ioctl("BIOCSETIF", e))?;

    let enable: c_uint = 1;
    unsafe { biocimmediate(fd, &enable) }.map_err(|e| Error::ioctl("BIOCIMMEDIATE", e))?;
    // Written frames carry their own source address.
    unsafe { biocshdrcmplt(fd, &enable) }.map_err(|e| Error::ioctl("BIOCSHDRCMPLT", e))?;
    if flags.promiscuous {
        unsafe { biocpromisc(fd) }.map_err(|e| Error::ioctl("BIOCPROMISC", e))?;
    }

    let mut blen: c_uint = 0;
    unsafe { biocgblen(fd, &mut blen) }.map_err(|e| Error::ioctl("BIOCGBLEN", e))?;
    Ok(blen as usize)
}

fn query_mtu(name: [c_char; IFNAMSIZ]) -> Result<usize> {
    let sock = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        None,
    )?;
    let mut ifr = IfReq::new(name);
    unsafe { siocgifmtu(sock.as_raw_fd(), &mut ifr) }
        .map_err(|e| Error::ioctl("SIOCGIFMTU", e))?;
    let mut mtu = [0u8; 4];
    mtu.copy_from_slice(&ifr.data[..4]);
    Ok(i32::from_ne_bytes(mtu).max(0) as usize)
}

fn query_hardware_addr(ifname: &str) -> Result<MacAddress> {
    let addr = nix::ifaddrs::getifaddrs()?
        .filter(|ifa| ifa.interface_name == ifname)
        .find_map(|ifa| ifa.address.as_ref()?.as_link_addr()?.addr());
    match addr {
        Some(bytes) => Ok(MacAddress::new(bytes)),
        None => Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{ifname} has no link-layer address"),
        ))),
    }
}

fn query_interface(ifname: &str, name: [c_char; IFNAMSIZ]) -> Result<Interface> {
    Ok(Interface {
        name: ifname.to_string(),
        index: nix::net::if_::if_nametoindex(ifname)?,
        hardware_addr: query_hardware_addr(ifname)?,
        mtu: query_mtu(name)?,
    })
}

fn write_frame(mut file: &File, max_frame_size: usize, frame: &[u8]) -> Result<()> {
    if frame.len() > max_frame_size {
        return Err(Error::FrameTooLarge {
            len: frame.len(),
            max: max_frame_size,
        });
    }
    let n = file.write(frame)?;
    if n != frame.len() {
        return Err(Error::PartialWrite {
            written: n,
            expected: frame.len(),
        });
    }
    Ok(())
}

pub struct Sock {
    file: Option<File>,
    batch: Batch,
    interface: Interface,
    admission: Admission,
}

impl Sock {
    fn from_parts(
        file: File,
        batch: Batch,
        interface: Interface,
        filter: Option<FrameFilter>,
    ) -> Self {
        let admission = Admission::new(interface.hardware_addr, filter);
        Self {
            file: Some(file),
            batch,
            interface,
            admission,
        }
    }
}

impl Socket for Sock {
    type Writer = Writer;

    fn create(ifname: &str, filter: Option<FrameFilter>, flags: &Flags) -> Result<Self> {
        let name = api::encode_name(ifname)?;
        let file = open_device()?;
        let blen = configure(file.as_raw_fd(), name, flags)?;
        let interface = query_interface(ifname, name)?;
        debug!(interface = %interface, buffer_len = blen, "capture device bound");
        Ok(Self::from_parts(
            file,
            Batch::new(blen, capture::NATIVE),
            interface,
            filter,
        ))
    }

    fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Frames already buffered are still delivered after close.
    fn recv(&mut self, frame: &mut Frame) -> Result<SystemTime> {
        loop {
            loop {
                let record = match self.batch.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(interface = %self.interface.name, "{e}; dropping rest of batch");
                        return Err(e);
                    }
                };
                let time = record.time;
                frame.set_contents(record.data);
                if self.admission.admits(frame) {
                    return Ok(time);
                }
            }

            let file = self.file.as_mut().ok_or(Error::Closed)?;
            let n = self.batch.fill_from(file)?;
            if n == 0 {
                return Err(Error::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            trace!(interface = %self.interface.name, bytes = n, "read capture batch");
        }
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        write_frame(file, self.interface.max_frame_size(), frame)
    }

    fn try_clone_writer(&self) -> Result<Writer> {
        let file = self.file.as_ref().ok_or(Error::Closed)?.try_clone()?;
        Ok(Writer {
            file,
            max_frame_size: self.interface.max_frame_size(),
        })
    }

    fn close(&mut self) -> Result<()> {
        let file = self.file.take().ok_or(Error::Closed)?;
        nix::unistd::close(file.into_raw_fd())?;
        Ok(())
    }
}

pub struct Writer {
    file: File,
    max_frame_size: usize,
}

impl FrameWriter for Writer {
    fn write(&self, frame: &[u8]) -> Result<()> {
        write_frame(&self.file, self.max_frame_size, frame)
    }
}
