use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use super::ethernet::MacAddr;
use super::iface::InterfaceName;

/// What a single link-layer receive produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRecv {
    /// Bytes of the frame, header included. May exceed the buffer handed in.
    pub len: usize,
    /// Link-layer source address reported by the kernel for the frame.
    pub src: MacAddr,
    /// The frame was transmitted by this host and looped back to the socket.
    pub outgoing: bool,
}

/// Platform capability behind `EthernetTransport`: a raw link-layer socket
/// plus the interface queries that go with it.
pub trait LinkSocket {
    /// Names of all configured interfaces, in the order the kernel lists them.
    fn interface_names(&self) -> io::Result<Vec<InterfaceName>>;

    fn is_loopback(&self, name: &InterfaceName) -> io::Result<bool>;

    fn hardware_addr(&self, name: &InterfaceName) -> io::Result<MacAddr>;

    fn interface_index(&self, name: &InterfaceName) -> io::Result<i32>;

    /// IPv4 address assigned to the interface.
    fn interface_ipv4(&self, name: &InterfaceName) -> io::Result<Ipv4Addr>;

    /// Restricts subsequent receives to frames arriving on `name`, whose
    /// index is `ifindex`.
    fn bind_to_device(&mut self, name: &InterfaceName, ifindex: i32) -> io::Result<()>;

    fn send_frame(&mut self, frame: &[u8], ifindex: i32, dst: MacAddr) -> io::Result<usize>;

    /// Blocks for one frame, at most `timeout`. Running out of time is a
    /// `WouldBlock` or `TimedOut` error.
    fn recv_frame(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<LinkRecv>;
}
