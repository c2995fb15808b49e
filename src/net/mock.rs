//! In-memory `LinkSocket` for unit tests.

use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::ethernet::MacAddr;
use super::iface::InterfaceName;
use super::link::{LinkRecv, LinkSocket};

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub data: Vec<u8>,
    pub ifindex: i32,
    pub dst: MacAddr,
}

#[derive(Debug, Clone)]
struct MockInterface {
    name: InterfaceName,
    mac: MacAddr,
    ipv4: Option<Ipv4Addr>,
    loopback: bool,
}

enum Incoming {
    Frame {
        data: Vec<u8>,
        src: MacAddr,
        outgoing: bool,
        arrival: Arrival,
    },
    Error(io::ErrorKind),
}

/// When a queued frame shows up, measured from the start of the receive.
#[derive(Clone, Copy)]
enum Arrival {
    After(Duration),
    /// Just as the receive's timeout runs out.
    AtTimeout,
}

impl Arrival {
    fn wait(self, timeout: Duration) -> Option<Duration> {
        match self {
            Arrival::After(delay) if delay > timeout => None,
            Arrival::After(delay) => Some(delay),
            Arrival::AtTimeout => Some(timeout),
        }
    }
}

#[derive(Default)]
struct State {
    interfaces: Vec<MockInterface>,
    sent: Vec<SentFrame>,
    incoming: VecDeque<Incoming>,
    bound: Option<(InterfaceName, i32)>,
    fail_send: bool,
    recv_timeouts: Vec<Duration>,
}

/// Cloneable handle; all clones share the same state so a test can keep one
/// while the transport owns another.
#[derive(Clone, Default)]
pub struct MockLinkSocket {
    state: Arc<Mutex<State>>,
}

impl MockLinkSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// One non-loopback interface with address 192.0.2.1.
    pub fn with_interface(name: &str, mac: MacAddr) -> Self {
        let mock = Self::new();
        mock.add_interface(name, mac, false);
        mock.set_ipv4(name, Ipv4Addr::new(192, 0, 2, 1));
        mock
    }

    pub fn add_interface(&self, name: &str, mac: MacAddr, loopback: bool) {
        self.state.lock().unwrap().interfaces.push(MockInterface {
            name: InterfaceName::new(name).unwrap(),
            mac,
            ipv4: None,
            loopback,
        });
    }

    pub fn set_ipv4(&self, name: &str, addr: Ipv4Addr) {
        let mut state = self.state.lock().unwrap();
        let iface = state
            .interfaces
            .iter_mut()
            .find(|i| i.name.as_str() == name)
            .unwrap();
        iface.ipv4 = Some(addr);
    }

    /// Interface indices start at 1, in insertion order.
    pub fn index_of(&self, name: &str) -> i32 {
        let state = self.state.lock().unwrap();
        let pos = state
            .interfaces
            .iter()
            .position(|i| i.name.as_str() == name)
            .unwrap();
        pos as i32 + 1
    }

    pub fn push_frame(&self, src: MacAddr, data: Vec<u8>) {
        self.push_frame_after(Duration::ZERO, src, data);
    }

    /// Queues a frame that shows up `delay` into the receive. A receive with
    /// less time left than `delay` times out and leaves the frame queued.
    pub fn push_frame_after(&self, delay: Duration, src: MacAddr, data: Vec<u8>) {
        self.state.lock().unwrap().incoming.push_back(Incoming::Frame {
            data,
            src,
            outgoing: false,
            arrival: Arrival::After(delay),
        });
    }

    /// Queues a frame that looks like this host's own transmission.
    pub fn push_outgoing(&self, data: Vec<u8>) {
        self.push_outgoing_after(Duration::ZERO, data);
    }

    pub fn push_outgoing_after(&self, delay: Duration, data: Vec<u8>) {
        self.push_outgoing_arriving(Arrival::After(delay), data);
    }

    /// Own frame delivered the moment the receive would time out.
    pub fn push_outgoing_at_timeout(&self, data: Vec<u8>) {
        self.push_outgoing_arriving(Arrival::AtTimeout, data);
    }

    fn push_outgoing_arriving(&self, arrival: Arrival, data: Vec<u8>) {
        self.state.lock().unwrap().incoming.push_back(Incoming::Frame {
            data,
            src: MacAddr::ZERO,
            outgoing: true,
            arrival,
        });
    }

    pub fn push_error(&self, kind: io::ErrorKind) {
        self.state
            .lock()
            .unwrap()
            .incoming
            .push_back(Incoming::Error(kind));
    }

    pub fn fail_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_send = fail;
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn bound_device(&self) -> Option<(InterfaceName, i32)> {
        self.state.lock().unwrap().bound
    }

    /// Timeout handed to each `recv_frame` call, in call order.
    pub fn recv_timeouts(&self) -> Vec<Duration> {
        self.state.lock().unwrap().recv_timeouts.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().incoming.len()
    }

    fn with_iface<T>(
        &self,
        name: &InterfaceName,
        f: impl FnOnce(usize, &MockInterface) -> io::Result<T>,
    ) -> io::Result<T> {
        let state = self.state.lock().unwrap();
        match state.interfaces.iter().position(|i| &i.name == name) {
            Some(pos) => f(pos, &state.interfaces[pos]),
            None => Err(io::Error::from_raw_os_error(libc::ENODEV)),
        }
    }
}

impl LinkSocket for MockLinkSocket {
    fn interface_names(&self) -> io::Result<Vec<InterfaceName>> {
        let state = self.state.lock().unwrap();
        Ok(state.interfaces.iter().map(|i| i.name).collect())
    }

    fn is_loopback(&self, name: &InterfaceName) -> io::Result<bool> {
        self.with_iface(name, |_, i| Ok(i.loopback))
    }

    fn hardware_addr(&self, name: &InterfaceName) -> io::Result<MacAddr> {
        self.with_iface(name, |_, i| Ok(i.mac))
    }

    fn interface_index(&self, name: &InterfaceName) -> io::Result<i32> {
        self.with_iface(name, |pos, _| Ok(pos as i32 + 1))
    }

    fn interface_ipv4(&self, name: &InterfaceName) -> io::Result<Ipv4Addr> {
        self.with_iface(name, |_, i| {
            i.ipv4
                .ok_or_else(|| io::Error::from_raw_os_error(libc::EADDRNOTAVAIL))
        })
    }

    fn bind_to_device(&mut self, name: &InterfaceName, ifindex: i32) -> io::Result<()> {
        self.with_iface(name, |_, _| Ok(()))?;
        self.state.lock().unwrap().bound = Some((*name, ifindex));
        Ok(())
    }

    fn send_frame(&mut self, frame: &[u8], ifindex: i32, dst: MacAddr) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(io::Error::from_raw_os_error(libc::ENETDOWN));
        }
        state.sent.push(SentFrame {
            data: frame.to_vec(),
            ifindex,
            dst,
        });
        Ok(frame.len())
    }

    fn recv_frame(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<LinkRecv> {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.recv_timeouts.push(timeout);
            let arrival = match state.incoming.front() {
                Some(Incoming::Frame { arrival, .. }) => *arrival,
                _ => Arrival::After(Duration::ZERO),
            };
            match arrival.wait(timeout) {
                Some(wait) => Some((wait, state.incoming.pop_front())),
                None => None,
            }
        };

        match next {
            // arrives too late: the whole timeout passes and the frame stays queued
            None => {
                thread::sleep(timeout);
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            Some((wait, Some(Incoming::Frame {
                data,
                src,
                outgoing,
                ..
            }))) => {
                thread::sleep(wait);
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(LinkRecv {
                    len: data.len(),
                    src,
                    outgoing,
                })
            }
            Some((_, Some(Incoming::Error(kind)))) => Err(io::Error::from(kind)),
            Some((_, None)) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}
