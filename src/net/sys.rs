//! Kernel structures and ioctl requests not exported by `libc` on every
//! target. Layouts follow `<linux/if.h>` and `<linux/if_arp.h>`.
#![allow(non_camel_case_types)]
// only some union members are read, the rest fix the layout
#![allow(dead_code)]

pub(crate) const SIOCGIFCONF: libc::c_ulong = 0x8912;
pub(crate) const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
pub(crate) const SIOCGIFADDR: libc::c_ulong = 0x8915;
pub(crate) const SIOCGIFHWADDR: libc::c_ulong = 0x8927;
pub(crate) const SIOCGIFINDEX: libc::c_ulong = 0x8933;
pub(crate) const SIOCGARP: libc::c_ulong = 0x8954;

/// `sll_pkttype` of a frame sent by this host.
pub(crate) const PACKET_OUTGOING: libc::c_uchar = 4;
pub(crate) const ARPHRD_ETHER: libc::c_ushort = 1;
/// Neighbour entry is complete: `arp_ha` holds a resolved address.
pub(crate) const ATF_COM: libc::c_int = 0x02;

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct ifmap {
    pub(crate) mem_start: libc::c_ulong,
    pub(crate) mem_end: libc::c_ulong,
    pub(crate) base_addr: libc::c_ushort,
    pub(crate) irq: libc::c_uchar,
    pub(crate) dma: libc::c_uchar,
    pub(crate) port: libc::c_uchar,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union ifru {
    pub(crate) ifru_addr: libc::sockaddr,
    pub(crate) ifru_hwaddr: libc::sockaddr,
    pub(crate) ifru_flags: libc::c_short,
    pub(crate) ifru_ivalue: libc::c_int,
    pub(crate) ifru_map: ifmap,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct ifreq {
    pub(crate) ifr_name: [libc::c_char; libc::IFNAMSIZ],
    pub(crate) ifr_ifru: ifru,
}

#[repr(C)]
pub(crate) struct ifconf {
    pub(crate) ifc_len: libc::c_int,
    pub(crate) ifc_req: *mut ifreq,
}

#[repr(C)]
pub(crate) struct arpreq {
    pub(crate) arp_pa: libc::sockaddr,
    pub(crate) arp_ha: libc::sockaddr,
    pub(crate) arp_flags: libc::c_int,
    pub(crate) arp_netmask: libc::sockaddr,
    pub(crate) arp_dev: [libc::c_char; libc::IFNAMSIZ],
}

impl ifreq {
    pub(crate) fn zeroed() -> Self {
        // all-zero is a valid ifreq: empty name, zeroed union
        unsafe { std::mem::zeroed() }
    }

    pub(crate) fn with_name(name: [libc::c_char; libc::IFNAMSIZ]) -> Self {
        let mut ifr = Self::zeroed();
        ifr.ifr_name = name;
        ifr
    }
}
