use std::ffi::CStr;
use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::ptr;

use tracing::trace;

use super::ethernet::{MacAddr, ETH_ALEN};
use super::iface::InterfaceName;
use super::rawsock;
use super::sys::{self, arpreq};

/// Looks `target` up in the kernel neighbour table.
///
/// `SIOCGARP` needs the device the entry lives on, which an ICMP reply does
/// not tell us, so every interface is tried and the first complete entry
/// wins. `Ok(None)` means no interface knows the address.
pub fn lookup(target: Ipv4Addr) -> io::Result<Option<MacAddr>> {
    let sock = rawsock::open(libc::AF_INET, libc::SOCK_DGRAM, 0)?;

    let mut req: arpreq = unsafe { mem::zeroed() };
    let mut pa: libc::sockaddr_in = unsafe { mem::zeroed() };
    pa.sin_family = libc::AF_INET as libc::sa_family_t;
    pa.sin_addr.s_addr = u32::from(target).to_be();
    // sockaddr and sockaddr_in are both 16 bytes
    unsafe { ptr::write_unaligned(&mut req.arp_pa as *mut _ as *mut libc::sockaddr_in, pa) };
    req.arp_ha.sa_family = sys::ARPHRD_ETHER;

    for name in interface_names()? {
        req.arp_dev = name.to_c_buf();
        let err = unsafe { libc::ioctl(sock.as_raw_fd(), sys::SIOCGARP as _, &mut req as *mut arpreq) };
        if err < 0 {
            trace!(iface = %name, %target, "no neighbour entry: {}", io::Error::last_os_error());
            continue;
        }
        if req.arp_flags & sys::ATF_COM == 0 {
            trace!(iface = %name, %target, "neighbour entry incomplete");
            continue;
        }

        let mut octets = [0u8; ETH_ALEN];
        for (dst, &src) in octets.iter_mut().zip(req.arp_ha.sa_data.iter()) {
            *dst = src as u8;
        }
        return Ok(Some(MacAddr(octets)));
    }
    Ok(None)
}

/// Distinct names of interfaces that carry at least one address.
fn interface_names() -> io::Result<Vec<InterfaceName>> {
    let mut ifap: *mut libc::ifaddrs = ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut ifap) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut names: Vec<InterfaceName> = Vec::new();
    let mut cur = ifap;
    while !cur.is_null() {
        // cur walks the list getifaddrs allocated and is freed only below
        let ifa = unsafe { &*cur };
        if !ifa.ifa_addr.is_null() && !ifa.ifa_name.is_null() {
            let raw = unsafe { CStr::from_ptr(ifa.ifa_name) };
            if let Some(name) = raw.to_str().ok().and_then(|s| InterfaceName::new(s).ok()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        cur = ifa.ifa_next;
    }
    unsafe { libc::freeifaddrs(ifap) };

    Ok(names)
}
