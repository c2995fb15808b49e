use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::ethernet::MacAddr;

/// Longest interface name the kernel accepts, excluding the trailing NUL.
pub const IF_NAME_MAX: usize = libc::IFNAMSIZ - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterfaceNameError {
    #[error("interface name is empty")]
    Empty,
    #[error("interface name {0:?} is longer than {IF_NAME_MAX} bytes")]
    TooLong(String),
    #[error("interface name contains a NUL byte")]
    Nul,
    #[error("interface name is not valid UTF-8")]
    NotUtf8,
}

/// An interface name as the kernel stores it: at most `IF_NAME_MAX` bytes,
/// with an explicit length instead of NUL termination.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InterfaceName {
    buf: [u8; IF_NAME_MAX],
    len: u8,
}

impl InterfaceName {
    pub fn new(name: &str) -> Result<Self, InterfaceNameError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() {
            return Err(InterfaceNameError::Empty);
        }
        if bytes.len() > IF_NAME_MAX {
            return Err(InterfaceNameError::TooLong(name.to_string()));
        }
        if bytes.contains(&0) {
            return Err(InterfaceNameError::Nul);
        }

        let mut buf = [0u8; IF_NAME_MAX];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(InterfaceName {
            buf,
            len: bytes.len() as u8,
        })
    }

    /// Reads a name out of a kernel `ifr_name` field, stopping at the first NUL.
    pub fn from_c_buf(raw: &[libc::c_char]) -> Result<Self, InterfaceNameError> {
        let bytes: Vec<u8> = raw
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        let name = std::str::from_utf8(&bytes).map_err(|_| InterfaceNameError::NotUtf8)?;
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        // constructed from a &str, so always valid UTF-8
        std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    /// NUL-padded copy suitable for `ifr_name` / `SO_BINDTODEVICE`.
    pub fn to_c_buf(&self) -> [libc::c_char; libc::IFNAMSIZ] {
        let mut out = [0 as libc::c_char; libc::IFNAMSIZ];
        for (dst, &src) in out.iter_mut().zip(self.as_bytes()) {
            *dst = src as libc::c_char;
        }
        out
    }

    pub fn is_loopback_name(&self) -> bool {
        self.as_str() == "lo"
    }
}

impl FromStr for InterfaceName {
    type Err = InterfaceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// One entry of the system interface table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: InterfaceName,
    pub mac: MacAddr,
    /// Loopback interfaces are reported but never used for sending.
    pub loopback: bool,
}

/// Interfaces usable for sending, in discovery order, never more than `capacity`.
#[derive(Debug, Clone)]
pub struct InterfaceList {
    entries: Vec<InterfaceDescriptor>,
    capacity: usize,
}

impl InterfaceList {
    pub fn with_capacity(capacity: usize) -> Self {
        InterfaceList {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Keeps the non-loopback descriptors from `discovered`, in order,
    /// until the list is full. Returns the list and how many usable ones
    /// did not fit.
    pub fn collect(
        capacity: usize,
        discovered: impl IntoIterator<Item = InterfaceDescriptor>,
    ) -> (Self, usize) {
        let mut list = Self::with_capacity(capacity);
        let mut dropped = 0;
        for desc in discovered.into_iter().filter(|d| !d.loopback) {
            if !list.push(desc) {
                dropped += 1;
            }
        }
        (list, dropped)
    }

    /// Returns false if the list is already full.
    pub fn push(&mut self, desc: InterfaceDescriptor) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(desc);
        true
    }

    /// Entry at `idx`, with `idx` clamped into the discovered range.
    pub fn get_clamped(&self, idx: usize) -> Option<&InterfaceDescriptor> {
        let last = self.entries.len().checked_sub(1)?;
        self.entries.get(idx.min(last))
    }

    pub fn find(&self, name: &InterfaceName) -> Option<&InterfaceDescriptor> {
        self.entries.iter().find(|d| &d.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceDescriptor> {
        self.entries.iter()
    }
}
