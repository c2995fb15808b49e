use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::error::TransportError;
use super::iface::{InterfaceDescriptor, InterfaceList, InterfaceName};
use super::link::LinkSocket;
use crate::config::INTERFACE_MAX_COUNT;

pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;
/// Largest payload carried by one frame.
pub const ETH_DATA_LEN: usize = 1500;
pub const ETH_FRAME_LEN: usize = ETH_HLEN + ETH_DATA_LEN;

pub const ETH_P_IP: u16 = 0x0800;

/// 48-bit hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; ETH_ALEN]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; ETH_ALEN]);

    pub fn octets(&self) -> [u8; ETH_ALEN] {
        self.0
    }

    /// Takes the first six bytes of a kernel address field.
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        let octets: [u8; ETH_ALEN] = raw.get(..ETH_ALEN)?.try_into().ok()?;
        Some(MacAddr(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ether_type: u16,
}

impl EthernetHeader {
    pub fn encode(&self) -> [u8; ETH_HLEN] {
        let mut raw = [0u8; ETH_HLEN];
        raw[0..6].copy_from_slice(&self.dst.0);
        raw[6..12].copy_from_slice(&self.src.0);
        raw[12..14].copy_from_slice(&self.ether_type.to_be_bytes());
        raw
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < ETH_HLEN {
            return None;
        }
        Some(EthernetHeader {
            dst: MacAddr::from_slice(&raw[0..6])?,
            src: MacAddr::from_slice(&raw[6..12])?,
            ether_type: u16::from_be_bytes([raw[12], raw[13]]),
        })
    }
}

/// Frames payloads into Ethernet and moves them over a raw link-layer socket.
pub struct EthernetTransport<S> {
    sock: S,
    interfaces: InterfaceList,
    recv_timeout: Duration,
    peer_mac: MacAddr,
    /// Interface of the last send and its index.
    used_interface: Option<(InterfaceName, i32)>,
}

impl<S: LinkSocket> EthernetTransport<S> {
    /// Takes ownership of an opened socket and discovers the non-loopback
    /// interfaces. Fails if none is found.
    pub fn new(sock: S, recv_timeout: Duration) -> Result<Self, TransportError> {
        let interfaces = discover_interfaces(&sock)?;
        debug!(count = interfaces.len(), "discovered interfaces");

        Ok(EthernetTransport {
            sock,
            interfaces,
            recv_timeout,
            peer_mac: MacAddr::ZERO,
            used_interface: None,
        })
    }

    /// Sends `payload` (truncated to `ETH_DATA_LEN`) as a broadcast IPv4 frame
    /// out of `if_name`. Returns the number of bytes handed to the socket.
    pub fn send_request(
        &mut self,
        payload: &[u8],
        if_name: &InterfaceName,
    ) -> Result<usize, TransportError> {
        let (src, ifindex) = self.lookup_interface(if_name)?;

        let header = EthernetHeader {
            dst: MacAddr::BROADCAST,
            src,
            ether_type: ETH_P_IP,
        };
        let data_len = payload.len().min(ETH_DATA_LEN);
        if data_len < payload.len() {
            debug!(requested = payload.len(), data_len, "ethernet payload truncated");
        }

        let mut frame = [0u8; ETH_FRAME_LEN];
        frame[..ETH_HLEN].copy_from_slice(&header.encode());
        frame[ETH_HLEN..ETH_HLEN + data_len].copy_from_slice(&payload[..data_len]);
        let tx_len = ETH_HLEN + data_len;

        self.used_interface = Some((*if_name, ifindex));
        let sent = self
            .sock
            .send_frame(&frame[..tx_len], ifindex, header.dst)
            .map_err(TransportError::Send)?;
        trace!(iface = %if_name, ifindex, %src, sent, "frame sent");

        Ok(sent)
    }

    /// Waits for one frame on the interface of the last send and copies as
    /// much of its payload as fits into `buf`.
    ///
    /// Returns the payload length of the frame, which may be larger than
    /// `buf`. Frames this host sent itself are skipped; the whole call never
    /// waits longer than the receive timeout.
    pub fn receive_reply(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let (if_name, ifindex) = self.used_interface.ok_or(TransportError::NoInterfaceSelected)?;
        self.sock
            .bind_to_device(&if_name, ifindex)
            .map_err(|source| TransportError::BindDevice {
                name: if_name,
                source,
            })?;

        let deadline = Instant::now() + self.recv_timeout;
        let mut frame = [0u8; ETH_FRAME_LEN];
        let recv = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let recv = match self.sock.recv_frame(&mut frame, remaining) {
                Ok(recv) => recv,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_recv(err)),
            };
            if !recv.outgoing {
                break recv;
            }
            trace!(len = recv.len, "skipping own frame");
        };

        let Some(payload_len) = recv.len.checked_sub(ETH_HLEN) else {
            return Err(TransportError::Malformed {
                layer: "ethernet",
                len: recv.len,
                min: ETH_HLEN,
            });
        };
        let in_frame = recv.len.min(ETH_FRAME_LEN);
        let copied = buf.len().min(in_frame - ETH_HLEN);
        buf[..copied].copy_from_slice(&frame[ETH_HLEN..ETH_HLEN + copied]);

        self.peer_mac = recv.src;
        if let Some(header) = EthernetHeader::decode(&frame[..in_frame]) {
            debug!(
                peer = %recv.src,
                ether_type = format_args!("{:#06x}", header.ether_type),
                payload_len,
                copied,
                "frame received"
            );
        }

        Ok(payload_len)
    }

    /// Source address of the most recently received frame.
    pub fn destination_mac(&self) -> MacAddr {
        self.peer_mac
    }

    /// Name of the discovered interface at `idx`, clamped into range.
    pub fn interface_name(&self, idx: usize) -> Option<&InterfaceName> {
        self.interfaces.get_clamped(idx).map(|d| &d.name)
    }

    pub fn interfaces(&self) -> &InterfaceList {
        &self.interfaces
    }

    pub(crate) fn socket(&self) -> &S {
        &self.sock
    }

    /// Own hardware address and index of `if_name`. Loopback has no
    /// hardware address and is answered without asking the kernel.
    fn lookup_interface(&self, if_name: &InterfaceName) -> Result<(MacAddr, i32), TransportError> {
        let lookup_err = |source| TransportError::InterfaceLookup {
            name: *if_name,
            source,
        };

        let mac = if if_name.is_loopback_name() {
            MacAddr::ZERO
        } else {
            self.sock.hardware_addr(if_name).map_err(lookup_err)?
        };
        let ifindex = self.sock.interface_index(if_name).map_err(lookup_err)?;

        Ok((mac, ifindex))
    }
}

fn discover_interfaces<S: LinkSocket>(sock: &S) -> Result<InterfaceList, TransportError> {
    let names = sock.interface_names().map_err(TransportError::InterfaceList)?;

    let discovered = names.into_iter().filter_map(|name| {
        let loopback = match sock.is_loopback(&name) {
            Ok(loopback) => loopback,
            Err(err) => {
                warn!(iface = %name, "can't get flags of interface: {err}");
                return None;
            }
        };
        let mac = if loopback {
            MacAddr::ZERO
        } else {
            sock.hardware_addr(&name).unwrap_or_else(|err| {
                debug!(iface = %name, "no hardware address: {err}");
                MacAddr::ZERO
            })
        };
        Some(InterfaceDescriptor {
            name,
            mac,
            loopback,
        })
    });

    let (list, dropped) = InterfaceList::collect(INTERFACE_MAX_COUNT, discovered);
    if dropped > 0 {
        debug!(dropped, "interface list full, ignoring the rest");
    }
    if list.is_empty() {
        return Err(TransportError::NoUsableInterface);
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::MockLinkSocket;

    const PEER: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    const OWN: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    fn transport(mock: &MockLinkSocket) -> EthernetTransport<MockLinkSocket> {
        EthernetTransport::new(mock.clone(), Duration::from_secs(1)).unwrap()
    }

    fn eth0() -> InterfaceName {
        InterfaceName::new("eth0").unwrap()
    }

    fn frame_from(src: MacAddr, payload: &[u8]) -> Vec<u8> {
        let header = EthernetHeader {
            dst: OWN,
            src,
            ether_type: ETH_P_IP,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn header_layout() {
        let header = EthernetHeader {
            dst: MacAddr::BROADCAST,
            src: OWN,
            ether_type: ETH_P_IP,
        };
        let raw = header.encode();
        assert_eq!(&raw[0..6], &[0xff; 6]);
        assert_eq!(&raw[6..12], &OWN.0);
        assert_eq!(&raw[12..14], &[0x08, 0x00]);
        assert_eq!(EthernetHeader::decode(&raw), Some(header));
        assert_eq!(EthernetHeader::decode(&raw[..13]), None);
    }

    #[test]
    fn mac_display() {
        assert_eq!(PEER.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(MacAddr([0, 1, 2, 0x0a, 0x10, 0xff]).to_string(), "00:01:02:0a:10:ff");
    }

    #[test]
    fn construction_needs_a_usable_interface() {
        let mock = MockLinkSocket::new();
        mock.add_interface("lo", MacAddr::ZERO, true);
        let err = EthernetTransport::new(mock, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, TransportError::NoUsableInterface));
    }

    #[test]
    fn construction_skips_loopback() {
        let mock = MockLinkSocket::new();
        mock.add_interface("lo", MacAddr::ZERO, true);
        mock.add_interface("eth0", OWN, false);
        mock.add_interface("wlan0", PEER, false);

        let eth = transport(&mock);
        assert_eq!(eth.interface_name(0), Some(&eth0()));
        assert_eq!(eth.interface_name(7).unwrap().as_str(), "wlan0");
        assert_eq!(eth.interfaces().get_clamped(0).unwrap().mac, OWN);
    }

    #[test]
    fn send_builds_broadcast_frame() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);

        let sent = eth.send_request(&[1, 2, 3, 4], &eth0()).unwrap();
        assert_eq!(sent, ETH_HLEN + 4);

        let frames = mock.sent_frames();
        assert_eq!(frames.len(), 1);
        let header = EthernetHeader::decode(&frames[0].data).unwrap();
        assert_eq!(header.dst, MacAddr::BROADCAST);
        assert_eq!(header.src, OWN);
        assert_eq!(header.ether_type, ETH_P_IP);
        assert_eq!(&frames[0].data[ETH_HLEN..], &[1, 2, 3, 4]);
        assert_eq!(frames[0].ifindex, mock.index_of("eth0"));
    }

    #[test]
    fn send_truncates_to_frame_size() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);

        for requested in [ETH_DATA_LEN, ETH_DATA_LEN + 1, 4000] {
            let payload = vec![0x5a; requested];
            let sent = eth.send_request(&payload, &eth0()).unwrap();
            assert_eq!(sent, ETH_FRAME_LEN);
        }
        assert!(mock.sent_frames().iter().all(|f| f.data.len() == ETH_FRAME_LEN));
    }

    #[test]
    fn send_fails_on_unknown_interface() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);

        let err = eth
            .send_request(&[0], &InterfaceName::new("eth9").unwrap())
            .unwrap_err();
        assert!(matches!(err, TransportError::InterfaceLookup { .. }));
        assert!(mock.sent_frames().is_empty());
    }

    #[test]
    fn send_failure_is_reported() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        mock.fail_send(true);
        let mut eth = transport(&mock);

        let err = eth.send_request(&[0], &eth0()).unwrap_err();
        assert!(matches!(err, TransportError::Send(_)));
    }

    #[test]
    fn loopback_send_uses_zero_source() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        mock.add_interface("lo", PEER, true);
        let mut eth = transport(&mock);

        eth.send_request(&[0], &InterfaceName::new("lo").unwrap()).unwrap();
        let header = EthernetHeader::decode(&mock.sent_frames()[0].data).unwrap();
        assert_eq!(header.src, MacAddr::ZERO);
    }

    #[test]
    fn receive_requires_prior_send() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);

        let err = eth.receive_reply(&mut [0u8; 64]).unwrap_err();
        assert!(matches!(err, TransportError::NoInterfaceSelected));
    }

    #[test]
    fn receive_strips_header_and_records_peer() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);
        eth.send_request(&[0], &eth0()).unwrap();

        mock.push_frame(PEER, frame_from(PEER, &[9, 8, 7, 6, 5]));
        let mut buf = [0u8; 3];
        let n = eth.receive_reply(&mut buf).unwrap();

        assert_eq!(n, 5);
        assert_eq!(buf, [9, 8, 7]);
        assert_eq!(eth.destination_mac(), PEER);
        assert_eq!(mock.bound_device(), Some((eth0(), mock.index_of("eth0"))));
    }

    #[test]
    fn receive_rejects_short_frame() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);
        eth.send_request(&[0], &eth0()).unwrap();

        mock.push_frame(PEER, vec![0u8; ETH_HLEN - 1]);
        let err = eth.receive_reply(&mut [0u8; 64]).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Malformed { layer: "ethernet", len: 13, min: ETH_HLEN }
        ));
        assert_eq!(eth.destination_mac(), MacAddr::ZERO);
    }

    #[test]
    fn receive_header_only_frame_is_empty_success() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);
        eth.send_request(&[0], &eth0()).unwrap();

        mock.push_frame(PEER, frame_from(PEER, &[]));
        assert_eq!(eth.receive_reply(&mut [0u8; 64]).unwrap(), 0);
    }

    #[test]
    fn receive_skips_own_frames() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);
        eth.send_request(&[0], &eth0()).unwrap();

        mock.push_outgoing(frame_from(OWN, &[1, 1]));
        mock.push_frame(PEER, frame_from(PEER, &[2, 2, 2]));
        let mut buf = [0u8; 8];

        assert_eq!(eth.receive_reply(&mut buf).unwrap(), 3);
        assert_eq!(eth.destination_mac(), PEER);
    }

    #[test]
    fn own_frame_near_deadline_does_not_extend_wait() {
        let timeout = Duration::from_millis(300);
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = EthernetTransport::new(mock.clone(), timeout).unwrap();
        eth.send_request(&[0], &eth0()).unwrap();

        mock.push_outgoing_after(Duration::from_millis(250), frame_from(OWN, &[1]));
        mock.push_frame_after(Duration::from_millis(250), PEER, frame_from(PEER, &[2]));

        let started = Instant::now();
        let err = eth.receive_reply(&mut [0u8; 64]).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, TransportError::Timeout));
        assert!(elapsed < timeout + Duration::from_millis(150), "waited {elapsed:?}");

        let timeouts = mock.recv_timeouts();
        assert_eq!(timeouts.len(), 2);
        assert!(timeouts[0] <= timeout);
        assert!(timeouts[1] <= timeout - Duration::from_millis(250));
        assert_eq!(mock.pending(), 1);
        assert_eq!(eth.destination_mac(), MacAddr::ZERO);
    }

    #[test]
    fn own_frame_at_deadline_times_out_without_receiving_again() {
        let timeout = Duration::from_millis(100);
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = EthernetTransport::new(mock.clone(), timeout).unwrap();
        eth.send_request(&[0], &eth0()).unwrap();

        mock.push_outgoing_at_timeout(frame_from(OWN, &[1]));
        mock.push_frame(PEER, frame_from(PEER, &[2]));

        let err = eth.receive_reply(&mut [0u8; 64]).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert_eq!(mock.recv_timeouts().len(), 1);
        assert_eq!(mock.pending(), 1);
    }

    #[test]
    fn interrupted_receive_is_retried() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);
        eth.send_request(&[0], &eth0()).unwrap();

        mock.push_error(io::ErrorKind::Interrupted);
        mock.push_frame(PEER, frame_from(PEER, &[2, 2]));

        assert_eq!(eth.receive_reply(&mut [0u8; 8]).unwrap(), 2);
        assert_eq!(mock.recv_timeouts().len(), 2);
    }

    #[test]
    fn receive_timeout() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);
        eth.send_request(&[0], &eth0()).unwrap();

        let err = eth.receive_reply(&mut [0u8; 64]).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));

        mock.push_error(io::ErrorKind::ConnectionReset);
        let err = eth.receive_reply(&mut [0u8; 64]).unwrap_err();
        assert!(matches!(err, TransportError::Receive(_)));
    }

    #[test]
    fn peer_is_overwritten_by_each_receive() {
        let mock = MockLinkSocket::with_interface("eth0", OWN);
        let mut eth = transport(&mock);
        eth.send_request(&[0], &eth0()).unwrap();

        let other = MacAddr([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        mock.push_frame(PEER, frame_from(PEER, &[0]));
        mock.push_frame(other, frame_from(other, &[0]));

        eth.receive_reply(&mut [0u8; 4]).unwrap();
        assert_eq!(eth.destination_mac(), PEER);
        eth.receive_reply(&mut [0u8; 4]).unwrap();
        assert_eq!(eth.destination_mac(), other);
    }
}
