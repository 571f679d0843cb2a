//! AF_PACKET raw socket backend (Linux).
//!
//! One `recv` yields one frame and one `sendto` sends one frame.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::SystemTime;

use eui48::MacAddress;
use tracing::trace;

use crate::api::{
    self, Admission, Flags, FrameFilter, FrameWriter, Interface, Result, Socket,
};
use crate::errors::Error;
use crate::frame::Frame;

const ETH_P_ALL_BE: u16 = (libc::ETH_P_ALL as u16).to_be();

pub struct Sock {
    fd: Option<OwnedFd>,
    interface: Interface,
    admission: Admission,
}

impl Sock {
    pub(crate) fn from_parts(fd: OwnedFd, interface: Interface, filter: Option<FrameFilter>) -> Self {
        let admission = Admission::new(interface.hardware_addr, filter);
        Self {
            fd: Some(fd),
            interface,
            admission,
        }
    }

    fn raw_fd(&self) -> Result<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd).ok_or(Error::Closed)
    }
}

/// Opens a packet socket that receives nothing until [`bind`] sets the
/// protocol and interface.
fn open_socket() -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn ifreq_for(name: &[libc::c_char; api::IFNAMSIZ]) -> libc::ifreq {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    ifr.ifr_name = *name;
    ifr
}

fn ioctl_ifreq(
    fd: RawFd,
    request: libc::c_ulong,
    name: &'static str,
    ifr: &mut libc::ifreq,
) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, request as _, ifr as *mut libc::ifreq) };
    if ret < 0 {
        return Err(Error::ioctl(name, nix::errno::Errno::last()));
    }
    Ok(())
}

fn query_interface(
    fd: RawFd,
    ifname: &str,
    name: &[libc::c_char; api::IFNAMSIZ],
) -> Result<Interface> {
    let mut ifr = ifreq_for(name);
    ioctl_ifreq(fd, libc::SIOCGIFINDEX as libc::c_ulong, "SIOCGIFINDEX", &mut ifr)?;
    let index = unsafe { ifr.ifr_ifru.ifru_ifindex };

    let mut ifr = ifreq_for(name);
    ioctl_ifreq(fd, libc::SIOCGIFHWADDR as libc::c_ulong, "SIOCGIFHWADDR", &mut ifr)?;
    let sa_data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
    let mut hwaddr = [0u8; 6];
    for (dst, src) in hwaddr.iter_mut().zip(sa_data.iter()) {
        *dst = *src as u8;
    }

    let mut ifr = ifreq_for(name);
    ioctl_ifreq(fd, libc::SIOCGIFMTU as libc::c_ulong, "SIOCGIFMTU", &mut ifr)?;
    let mtu = unsafe { ifr.ifr_ifru.ifru_mtu };

    Ok(Interface {
        name: ifname.to_string(),
        index: index as u32,
        hardware_addr: MacAddress::new(hwaddr),
        mtu: mtu.max(0) as usize,
    })
}

fn link_addr(ifindex: u32) -> libc::sockaddr_ll {
    libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: ETH_P_ALL_BE,
        sll_ifindex: ifindex as i32,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 0,
        sll_addr: [0; 8],
    }
}

fn bind(fd: RawFd, ifindex: u32) -> Result<()> {
    let sockaddr = link_addr(ifindex);
    let ret = unsafe {
        libc::bind(
            fd,
            &sockaddr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as u32,
        )
    };
    if ret < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(())
}

fn set_promisc(fd: RawFd, ifindex: u32) -> Result<()> {
    let mreq = libc::packet_mreq {
        mr_ifindex: ifindex as i32,
        mr_type: libc::PACKET_MR_PROMISC as u16,
        mr_alen: 0,
        mr_address: [0; 8],
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            libc::PACKET_ADD_MEMBERSHIP,
            &mreq as *const _ as *const libc::c_void,
            mem::size_of::<libc::packet_mreq>() as u32,
        )
    };
    if ret < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(())
}

/// Sends `frame` to its destination address through interface `ifindex`.
fn send_frame(fd: RawFd, ifindex: u32, max_frame_size: usize, frame: &[u8]) -> Result<()> {
    if frame.len() > max_frame_size {
        return Err(Error::FrameTooLarge {
            len: frame.len(),
            max: max_frame_size,
        });
    }
    let mut sockaddr = link_addr(ifindex);
    sockaddr.sll_halen = 6;
    if let Some(dst) = frame.get(..6) {
        sockaddr.sll_addr[..6].copy_from_slice(dst);
    }
    let n = unsafe {
        libc::sendto(
            fd,
            frame.as_ptr() as *const libc::c_void,
            frame.len(),
            0,
            &sockaddr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as u32,
        )
    };
    if n < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    if n as usize != frame.len() {
        return Err(Error::PartialWrite {
            written: n as usize,
            expected: frame.len(),
        });
    }
    Ok(())
}

impl Socket for Sock {
    type Writer = Writer;

    fn create(ifname: &str, filter: Option<FrameFilter>, flags: &Flags) -> Result<Self> {
        let name = api::encode_name(ifname)?;
        let fd = open_socket()?;
        let interface = query_interface(fd.as_raw_fd(), ifname, &name)?;
        bind(fd.as_raw_fd(), interface.index)?;
        if flags.promiscuous {
            set_promisc(fd.as_raw_fd(), interface.index)?;
        }
        Ok(Self::from_parts(fd, interface, filter))
    }

    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn recv(&mut self, frame: &mut Frame) -> Result<SystemTime> {
        let fd = self.raw_fd()?;
        let max_frame_size = self.interface.max_frame_size();
        loop {
            let buf = frame.expose_capacity(max_frame_size);
            let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
            if n < 0 {
                let err = io::Error::last_os_error();
                frame.clear();
                return Err(Error::Io(err));
            }
            frame.truncate(n as usize);
            if self.admission.admits(frame) {
                return Ok(SystemTime::now());
            }
            trace!(interface = %self.interface.name, "frame discarded");
        }
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        send_frame(
            self.raw_fd()?,
            self.interface.index,
            self.interface.max_frame_size(),
            frame,
        )
    }

    fn try_clone_writer(&self) -> Result<Writer> {
        let fd = self.fd.as_ref().ok_or(Error::Closed)?.try_clone()?;
        Ok(Writer {
            fd,
            ifindex: self.interface.index,
            max_frame_size: self.interface.max_frame_size(),
        })
    }

    fn close(&mut self) -> Result<()> {
        let fd = self.fd.take().ok_or(Error::Closed)?;
        nix::unistd::close(fd.into_raw_fd())?;
        Ok(())
    }
}

pub struct Writer {
    fd: OwnedFd,
    ifindex: u32,
    max_frame_size: usize,
}

impl FrameWriter for Writer {
    fn write(&self, frame: &[u8]) -> Result<()> {
        send_frame(self.fd.as_raw_fd(), self.ifindex, self.max_frame_size, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Device;
    use crate::frame::{Ethertype, Tagging};
    use nix::sys::socket::{AddressFamily, MsgFlags, SockFlag, SockType, send, socketpair};

    const OWN: [u8; 6] = [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01];
    const PEER: [u8; 6] = [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x02];

    fn test_interface() -> Interface {
        Interface {
            name: "test0".into(),
            index: 7,
            hardware_addr: MacAddress::new(OWN),
            mtu: 1500,
        }
    }

    /// A socket whose peer end injects datagrams, standing in for the wire.
    fn wired(filter: Option<FrameFilter>) -> (Sock, OwnedFd) {
        let (ours, peer) = socketpair(
            AddressFamily::Unix,
            SockType::Datagram,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .unwrap();
        (Sock::from_parts(ours, test_interface(), filter), peer)
    }

    fn inject(peer: &OwnedFd, src: [u8; 6], ethertype: Ethertype, payload: &[u8]) {
        let mut frame = Frame::new();
        frame.prepare(
            MacAddress::broadcast(),
            MacAddress::new(src),
            Tagging::NotTagged,
            ethertype,
            payload.len(),
        );
        frame.payload_mut().copy_from_slice(payload);
        send(peer.as_raw_fd(), &frame, MsgFlags::empty()).unwrap();
    }

    fn is_would_block(err: &Error) -> bool {
        matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }

    #[test]
    fn test_recv_skips_self_sent() {
        let (mut sock, peer) = wired(None);
        inject(&peer, OWN, Ethertype::IPV4, b"mine");
        inject(&peer, PEER, Ethertype::IPV4, b"theirs");

        let mut frame = Frame::new();
        sock.recv(&mut frame).unwrap();
        assert_eq!(frame.source(), &PEER);
        assert_eq!(frame.payload(), b"theirs");
        assert_eq!(frame.len(), 14 + 6);
        assert!(frame.capacity() >= 1522);

        assert!(is_would_block(&sock.recv(&mut frame).unwrap_err()));
    }

    #[test]
    fn test_recv_applies_filter() {
        let filter: FrameFilter = Box::new(|frame: &Frame| frame.ethertype() == Ethertype::WSMP);
        let (mut sock, peer) = wired(Some(filter));
        inject(&peer, PEER, Ethertype::IPV4, b"drop");
        inject(&peer, PEER, Ethertype::WSMP, b"Hello, World!");
        inject(&peer, PEER, Ethertype::ARP, b"drop");

        let mut frame = Frame::new();
        sock.recv(&mut frame).unwrap();
        assert_eq!(frame.ethertype(), Ethertype::WSMP);
        assert_eq!(frame.payload(), b"Hello, World!");
        assert!(is_would_block(&sock.recv(&mut frame).unwrap_err()));
    }

    #[test]
    fn test_rejecting_filter_delivers_nothing() {
        let (mut sock, peer) = wired(Some(Box::new(|_: &Frame| false)));
        for i in 0..8u8 {
            inject(&peer, PEER, Ethertype::IPV4, &[i; 32]);
        }
        let mut frame = Frame::new();
        assert!(is_would_block(&sock.recv(&mut frame).unwrap_err()));
        assert!(frame.is_empty());
    }

    #[test]
    fn test_send_too_large_is_rejected_unsent() {
        let (sock, peer) = wired(None);
        let frame = vec![0u8; 1523];
        let err = sock.send(&frame).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { len: 1523, max: 1522 }));

        let mut buf = [0u8; 2048];
        let n = unsafe { libc::recv(peer.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len(), 0) };
        assert!(n < 0);
    }

    #[test]
    fn test_closed_device_fails() {
        let (sock, _peer) = wired(None);
        let mut device = Device::from_backend(sock);
        device.close().unwrap();

        assert!(matches!(device.write(&[0u8; 60]), Err(Error::Closed)));
        let mut frame = Frame::new();
        assert!(matches!(device.read(&mut frame), Err(Error::Closed)));
        assert!(matches!(device.close(), Err(Error::Closed)));
        assert!(device.try_clone_writer().is_err());
    }

    #[test]
    fn test_device_accessors() {
        let (sock, _peer) = wired(None);
        let device = Device::from_backend(sock);
        assert_eq!(device.name(), "test0");
        assert_eq!(device.mtu(), 1500);
        assert_eq!(device.max_frame_size(), 1522);
        assert_eq!(device.hardware_addr(), MacAddress::new(OWN));
        assert_eq!(device.interface().index, 7);
    }

    /// Needs CAP_NET_RAW: `sudo -E cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn test_unbound_socket_captures_nothing() {
        let fd = open_socket().unwrap();
        let mut protocol: libc::c_int = -1;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PROTOCOL,
                &mut protocol as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        assert_eq!(ret, 0);
        assert_eq!(protocol, 0);

        let sender = Device::open("lo", None).unwrap();
        let mut frame = Frame::new();
        frame.prepare(
            MacAddress::broadcast(),
            MacAddress::new(PEER),
            Tagging::NotTagged,
            Ethertype::from(0x1234),
            32,
        );
        for _ in 0..4 {
            sender.write(&frame).unwrap();
        }

        let mut buf = [0u8; 2048];
        let n = unsafe {
            libc::recv(
                fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };
        assert!(n < 0);
        assert_eq!(io::Error::last_os_error().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_create_rejects_bad_name() {
        let result = Sock::create("an_interface_name_too_long", None, &Flags::default());
        assert!(matches!(result, Err(Error::InvalidInterfaceName(_))));
    }
}
