use std::net::Ipv4Addr;

use tracing::{debug, trace};

use super::checksum::checksum;
use super::ethernet::{EthernetTransport, MacAddr, ETH_DATA_LEN};
use super::error::TransportError;
use super::iface::{InterfaceList, InterfaceName};
use super::link::LinkSocket;
use crate::config::{OutgoingInterface, DEFAULT_TTL};

/// Header length without options.
pub const IP_HLEN: usize = 20;
/// Largest payload that still fits one Ethernet frame.
pub const IP_MAX_PAYLOAD: usize = ETH_DATA_LEN - IP_HLEN;

pub const IPPROTO_ICMP: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    /// Header length in 32-bit words.
    pub ihl: u8,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub frag_off: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Option-less header for `payload_len` bytes of `protocol`, checksum unset.
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload_len: usize) -> Self {
        Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_len: (IP_HLEN + payload_len) as u16,
            id: 0,
            frag_off: 0,
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src,
            dst,
        }
    }

    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    pub fn encode(&self) -> [u8; IP_HLEN] {
        let mut raw = [0u8; IP_HLEN];
        raw[0] = (self.version << 4) | (self.ihl & 0x0f);
        raw[1] = self.tos;
        raw[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        raw[4..6].copy_from_slice(&self.id.to_be_bytes());
        raw[6..8].copy_from_slice(&self.frag_off.to_be_bytes());
        raw[8] = self.ttl;
        raw[9] = self.protocol;
        raw[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        raw[12..16].copy_from_slice(&self.src.octets());
        raw[16..20].copy_from_slice(&self.dst.octets());
        raw
    }

    /// Zeroes the checksum field, then stores the checksum of the encoded header.
    pub fn seal(&mut self) {
        self.checksum = 0;
        self.checksum = checksum(&self.encode());
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < IP_HLEN {
            return None;
        }
        let octets = |at: usize| Ipv4Addr::new(raw[at], raw[at + 1], raw[at + 2], raw[at + 3]);
        Some(Ipv4Header {
            version: raw[0] >> 4,
            ihl: raw[0] & 0x0f,
            tos: raw[1],
            total_len: u16::from_be_bytes([raw[2], raw[3]]),
            id: u16::from_be_bytes([raw[4], raw[5]]),
            frag_off: u16::from_be_bytes([raw[6], raw[7]]),
            ttl: raw[8],
            protocol: raw[9],
            checksum: u16::from_be_bytes([raw[10], raw[11]]),
            src: octets(12),
            dst: octets(16),
        })
    }
}

/// Wraps payloads in IPv4 headers and hands them to the Ethernet layer.
pub struct Ipv4Transport<S> {
    ether: EthernetTransport<S>,
    outgoing: OutgoingInterface,
}

impl<S: LinkSocket> Ipv4Transport<S> {
    pub fn new(ether: EthernetTransport<S>, outgoing: OutgoingInterface) -> Self {
        Ipv4Transport { ether, outgoing }
    }

    /// Sends `payload` (truncated to `IP_MAX_PAYLOAD`) to `dst` from the
    /// outgoing interface's own address.
    pub fn send_request(
        &mut self,
        payload: &[u8],
        dst: Ipv4Addr,
        protocol: u8,
    ) -> Result<usize, TransportError> {
        let if_name = self.outgoing_interface()?;
        let src = self
            .ether
            .socket()
            .interface_ipv4(&if_name)
            .map_err(|source| TransportError::InterfaceAddress {
                name: if_name,
                source,
            })?;

        let data_len = payload.len().min(IP_MAX_PAYLOAD);
        if data_len < payload.len() {
            debug!(requested = payload.len(), data_len, "ip payload truncated");
        }
        let mut header = Ipv4Header::new(src, dst, protocol, data_len);
        header.seal();

        let mut packet = [0u8; ETH_DATA_LEN];
        packet[..IP_HLEN].copy_from_slice(&header.encode());
        packet[IP_HLEN..IP_HLEN + data_len].copy_from_slice(&payload[..data_len]);
        trace!(iface = %if_name, %src, %dst, protocol, data_len, "sending ip packet");

        self.ether.send_request(&packet[..IP_HLEN + data_len], &if_name)
    }

    /// Receives one packet and copies up to `buf.len()` bytes of what follows
    /// the 20-byte header into `buf`.
    ///
    /// Returns the byte count the Ethernet layer reported, header included.
    pub fn receive_reply(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut packet = [0u8; ETH_DATA_LEN];
        let want = (buf.len() + IP_HLEN).min(ETH_DATA_LEN);
        let data_read = self.ether.receive_reply(&mut packet[..want])?;

        if data_read < IP_HLEN {
            return Err(TransportError::Malformed {
                layer: "ip",
                len: data_read,
                min: IP_HLEN,
            });
        }
        let available = data_read.min(want) - IP_HLEN;
        let copied = buf.len().min(available);
        buf[..copied].copy_from_slice(&packet[IP_HLEN..IP_HLEN + copied]);

        if let Some(header) = Ipv4Header::decode(&packet[..IP_HLEN]) {
            trace!(src = %header.src, protocol = header.protocol, data_read, copied, "ip packet received");
        }
        Ok(data_read)
    }

    pub fn destination_mac(&self) -> MacAddr {
        self.ether.destination_mac()
    }

    pub fn interfaces(&self) -> &InterfaceList {
        self.ether.interfaces()
    }

    fn outgoing_interface(&self) -> Result<InterfaceName, TransportError> {
        match &self.outgoing {
            OutgoingInterface::FirstDiscovered => self
                .ether
                .interface_name(0)
                .copied()
                .ok_or(TransportError::NoUsableInterface),
            OutgoingInterface::Named(name) => Ok(*name),
        }
    }
}
