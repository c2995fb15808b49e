use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use libc::{c_int, c_void, socklen_t};
use os_socketaddr::OsSocketAddr;
use tracing::trace;

use super::error::TransportError;
use super::ethernet::{MacAddr, ETH_ALEN};
use super::iface::InterfaceName;
use super::link::{LinkRecv, LinkSocket};
use super::sys::{self, ifconf, ifreq};

/// Room for this many entries in one `SIOCGIFCONF` answer.
const IFCONF_CAPACITY: usize = 32;

/// `AF_PACKET` socket capturing every EtherType, used by the hand-built
/// Ethernet path.
pub struct RawSocket {
    sock: OwnedFd,
}

impl RawSocket {
    pub fn new_packet(timeout: Duration) -> Result<Self, TransportError> {
        let proto = (libc::ETH_P_ALL as u16).to_be() as c_int;
        let sock = open(libc::AF_PACKET, libc::SOCK_RAW, proto).map_err(TransportError::Socket)?;
        set_recv_timeout(&sock, timeout).map_err(TransportError::ReceiveTimeoutConfig)?;
        trace!(fd = sock.as_raw_fd(), "packet socket opened");

        Ok(RawSocket { sock })
    }

    fn ioctl(&self, request: libc::c_ulong, ifr: &mut ifreq) -> io::Result<()> {
        ioctl_ifreq(self.sock.as_raw_fd(), request, ifr)
    }

    fn query(&self, request: libc::c_ulong, name: &InterfaceName) -> io::Result<ifreq> {
        let mut ifr = ifreq::with_name(name.to_c_buf());
        self.ioctl(request, &mut ifr)?;
        Ok(ifr)
    }
}

impl LinkSocket for RawSocket {
    fn interface_names(&self) -> io::Result<Vec<InterfaceName>> {
        let mut reqs = [ifreq::zeroed(); IFCONF_CAPACITY];
        let mut ifc = ifconf {
            ifc_len: mem::size_of_val(&reqs) as c_int,
            ifc_req: reqs.as_mut_ptr(),
        };
        // ifc points into `reqs`, which outlives the call
        let err = unsafe { libc::ioctl(self.sock.as_raw_fd(), sys::SIOCGIFCONF as _, &mut ifc) };
        if err < 0 {
            return Err(io::Error::last_os_error());
        }

        let count = (ifc.ifc_len.max(0) as usize / mem::size_of::<ifreq>()).min(IFCONF_CAPACITY);
        Ok(reqs[..count]
            .iter()
            .filter_map(|r| InterfaceName::from_c_buf(&r.ifr_name).ok())
            .collect())
    }

    fn is_loopback(&self, name: &InterfaceName) -> io::Result<bool> {
        let ifr = self.query(sys::SIOCGIFFLAGS, name)?;
        let flags = unsafe { ifr.ifr_ifru.ifru_flags } as c_int;
        Ok(flags & libc::IFF_LOOPBACK != 0)
    }

    fn hardware_addr(&self, name: &InterfaceName) -> io::Result<MacAddr> {
        let ifr = self.query(sys::SIOCGIFHWADDR, name)?;
        let sa_data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
        let mut octets = [0u8; ETH_ALEN];
        for (dst, &src) in octets.iter_mut().zip(sa_data.iter()) {
            *dst = src as u8;
        }
        Ok(MacAddr(octets))
    }

    fn interface_index(&self, name: &InterfaceName) -> io::Result<i32> {
        let ifr = self.query(sys::SIOCGIFINDEX, name)?;
        Ok(unsafe { ifr.ifr_ifru.ifru_ivalue })
    }

    fn interface_ipv4(&self, name: &InterfaceName) -> io::Result<Ipv4Addr> {
        // address queries go through a short-lived datagram socket
        let ctl = open(libc::AF_INET, libc::SOCK_DGRAM, 0)?;
        let mut ifr = ifreq::with_name(name.to_c_buf());
        ioctl_ifreq(ctl.as_raw_fd(), sys::SIOCGIFADDR, &mut ifr)?;

        let sin = unsafe {
            ptr::read_unaligned(&ifr.ifr_ifru.ifru_addr as *const _ as *const libc::sockaddr_in)
        };
        Ok(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)))
    }

    fn bind_to_device(&mut self, name: &InterfaceName, ifindex: i32) -> io::Result<()> {
        let dev = name.to_c_buf();
        let err = unsafe {
            libc::setsockopt(
                self.sock.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                dev.as_ptr() as *const c_void,
                dev.len() as socklen_t,
            )
        };
        if err < 0 {
            return Err(io::Error::last_os_error());
        }

        // packet sockets only filter receives by the address they are bound to
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = ifindex;
        let err = unsafe {
            libc::bind(
                self.sock.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as socklen_t,
            )
        };
        if err < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn send_frame(&mut self, frame: &[u8], ifindex: i32, dst: MacAddr) -> io::Result<usize> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_ifindex = ifindex;
        addr.sll_halen = ETH_ALEN as libc::c_uchar;
        addr.sll_addr[..ETH_ALEN].copy_from_slice(&dst.octets());

        let nb = unsafe {
            libc::sendto(
                self.sock.as_raw_fd(),
                frame.as_ptr() as *const c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as socklen_t,
            )
        };
        if nb < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(nb as usize)
    }

    fn recv_frame(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<LinkRecv> {
        wait_readable(&self.sock, timeout)?;

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut addrlen = mem::size_of::<libc::sockaddr_ll>() as socklen_t;

        // MSG_TRUNC makes packet sockets report the real frame length
        let nb = unsafe {
            libc::recvfrom(
                self.sock.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                libc::MSG_TRUNC,
                &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut addrlen,
            )
        };
        if nb < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(LinkRecv {
            len: nb as usize,
            src: MacAddr::from_slice(&addr.sll_addr).unwrap_or(MacAddr::ZERO),
            outgoing: addr.sll_pkttype == sys::PACKET_OUTGOING,
        })
    }
}

/// Kernel raw ICMP socket: the kernel builds the IP header and Ethernet frame.
pub struct IcmpSocket {
    sock: OwnedFd,
}

impl IcmpSocket {
    pub fn new(ip_ttl: u8, timeout: Duration) -> Result<Self, TransportError> {
        let sock = open(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_ICMP)
            .map_err(TransportError::Socket)?;

        let ttl = ip_ttl as c_int;
        let err = unsafe {
            libc::setsockopt(
                sock.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_TTL,
                &ttl as *const c_int as *const c_void,
                mem::size_of::<c_int>() as socklen_t,
            )
        };
        if err < 0 {
            return Err(TransportError::TtlConfig(io::Error::last_os_error()));
        }
        set_recv_timeout(&sock, timeout).map_err(TransportError::ReceiveTimeoutConfig)?;

        Ok(IcmpSocket { sock })
    }

    pub fn sendto(&self, payload: &[u8], dst: SocketAddr) -> io::Result<usize> {
        let addr: OsSocketAddr = dst.into();
        let nb = unsafe {
            libc::sendto(
                self.sock.as_raw_fd(),
                payload.as_ptr() as *const c_void,
                payload.len(),
                0,
                addr.as_ptr(),
                addr.len(),
            )
        };
        if nb < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(nb as usize)
    }

    pub fn recvfrom(&self, payload: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        let mut addr = OsSocketAddr::new();
        let mut addrlen = addr.capacity();
        let nb = unsafe {
            libc::recvfrom(
                self.sock.as_raw_fd(),
                payload.as_mut_ptr() as *mut c_void,
                payload.len(),
                0,
                addr.as_mut_ptr(),
                &mut addrlen as *mut _,
            )
        };
        if nb < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok((nb as usize, addr.into()))
    }
}

pub(crate) fn open(domain: c_int, ty: c_int, proto: c_int) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::socket(domain, ty | libc::SOCK_CLOEXEC, proto) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // fd was just returned by socket(2) and is owned by nobody else
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn ioctl_ifreq(fd: RawFd, request: libc::c_ulong, ifr: &mut ifreq) -> io::Result<()> {
    let err = unsafe { libc::ioctl(fd, request as _, ifr as *mut ifreq) };
    if err < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Waits until `sock` has data, at most `timeout` (rounded up to whole
/// milliseconds). Fails with `TimedOut` when nothing arrived.
fn wait_readable(sock: &OwnedFd, timeout: Duration) -> io::Result<()> {
    let millis = timeout.as_micros().div_ceil(1000).min(c_int::MAX as u128) as c_int;
    let mut pfd = libc::pollfd {
        fd: sock.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, millis) };
    match n {
        n if n < 0 => Err(io::Error::last_os_error()),
        0 => Err(io::Error::from(io::ErrorKind::TimedOut)),
        _ => Ok(()),
    }
}

fn set_recv_timeout(sock: &OwnedFd, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let err = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const c_void,
            mem::size_of::<libc::timeval>() as socklen_t,
        )
    };
    if err < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
