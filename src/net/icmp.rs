use std::net::Ipv4Addr;
use std::process;

use tracing::{debug, trace};

use super::checksum::checksum;
use super::error::{EchoError, TransportError};
use super::ethernet::{EthernetTransport, MacAddr};
use super::iface::InterfaceList;
use super::ipv4::{Ipv4Transport, IPPROTO_ICMP, IP_HLEN};
use super::link::LinkSocket;
use super::rawsock::RawSocket;
use crate::config::{Config, ReplyMatching, ECHO_PACKET_LEN, REPLY_BUF_LEN};

pub const HDR_BYTE_SIZE: usize = 8;

pub const ECHO_REPLY_TYPE: u8 = 0;
pub const ECHO_REQUEST_TYPE: u8 = 8;
pub const ECHO_REQUEST_CODE: u8 = 0;

/// The fixed part of any ICMP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub p_type: u8,
    pub code: u8,
    pub checksum: u16,
    /// Type-specific word: identifier and sequence for echo messages.
    pub rest_hdr: [u8; 4],
}

impl IcmpHeader {
    pub fn from_raw(raw: &[u8]) -> Option<IcmpHeader> {
        if raw.len() < HDR_BYTE_SIZE {
            return None;
        }
        Some(IcmpHeader {
            p_type: raw[0],
            code: raw[1],
            checksum: u16::from_be_bytes([raw[2], raw[3]]),
            rest_hdr: [raw[4], raw[5], raw[6], raw[7]],
        })
    }

    pub fn is_echo_reply(&self) -> bool {
        self.p_type == ECHO_REPLY_TYPE
    }

    pub fn get_echo_id(&self) -> u16 {
        u16::from_be_bytes([self.rest_hdr[0], self.rest_hdr[1]])
    }

    pub fn get_echo_seq(&self) -> u16 {
        u16::from_be_bytes([self.rest_hdr[2], self.rest_hdr[3]])
    }
}

/// Echo request padded with zeros to `ECHO_PACKET_LEN` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoPacket {
    pub id: u16,
    pub sequence: u16,
    checksum: u16,
    data: [u8; ECHO_PACKET_LEN - HDR_BYTE_SIZE],
}

impl EchoPacket {
    pub fn new_echo_req(id: u16, sequence: u16) -> EchoPacket {
        let mut pck = EchoPacket {
            id,
            sequence,
            checksum: 0,
            data: [0; ECHO_PACKET_LEN - HDR_BYTE_SIZE],
        };
        pck.checksum = checksum(&pck.raw());
        pck
    }

    pub fn raw(&self) -> [u8; ECHO_PACKET_LEN] {
        let mut raw = [0u8; ECHO_PACKET_LEN];
        raw[0] = ECHO_REQUEST_TYPE;
        raw[1] = ECHO_REQUEST_CODE;
        raw[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        raw[4..6].copy_from_slice(&self.id.to_be_bytes());
        raw[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        raw[HDR_BYTE_SIZE..].copy_from_slice(&self.data);
        raw
    }
}

/// Identifier for echo requests: the low 16 bits of the process id.
pub fn echo_identifier() -> u16 {
    (process::id() & 0xFFFF) as u16
}

/// Decides what a received ICMP message means for the request (`id`, `seq`).
pub fn classify_reply(
    icmp: &[u8],
    id: u16,
    seq: u16,
    matching: ReplyMatching,
) -> Result<(), EchoError> {
    let Some(header) = IcmpHeader::from_raw(icmp) else {
        return Err(EchoError::Network(TransportError::Malformed {
            layer: "icmp",
            len: icmp.len(),
            min: HDR_BYTE_SIZE,
        }));
    };

    if !header.is_echo_reply() {
        debug!(p_type = header.p_type, code = header.code, "not an echo reply");
        return Err(EchoError::HostUnreachable {
            kind: header.p_type,
            code: header.code,
        });
    }

    if matching == ReplyMatching::Strict
        && (header.get_echo_id() != id || header.get_echo_seq() != seq)
    {
        return Err(EchoError::UnexpectedReply {
            id: header.get_echo_id(),
            seq: header.get_echo_seq(),
        });
    }
    Ok(())
}

/// One echo request/reply round trip over hand-built Ethernet and IPv4 headers.
pub struct EchoClient<S> {
    ip: Ipv4Transport<S>,
    id: u16,
    seq: u16,
    matching: ReplyMatching,
}

impl EchoClient<RawSocket> {
    /// Opens the raw link-layer socket and discovers interfaces.
    pub fn open(config: &Config) -> Result<Self, TransportError> {
        let sock = RawSocket::new_packet(config.recv_timeout)?;
        Self::with_socket(sock, config)
    }
}

impl<S: LinkSocket> EchoClient<S> {
    pub fn with_socket(sock: S, config: &Config) -> Result<Self, TransportError> {
        let ether = EthernetTransport::new(sock, config.recv_timeout)?;
        Ok(EchoClient {
            ip: Ipv4Transport::new(ether, config.outgoing_interface),
            id: echo_identifier(),
            seq: 0,
            matching: config.reply_matching,
        })
    }

    /// Sends one echo request to `target` and waits for the answer.
    ///
    /// On an Echo-Reply returns the link-layer source address of the reply
    /// frame.
    pub fn ping(&mut self, target: Ipv4Addr) -> Result<MacAddr, EchoError> {
        let request = EchoPacket::new_echo_req(self.id, self.seq);
        self.ip
            .send_request(&request.raw(), target, IPPROTO_ICMP)
            .map_err(EchoError::Send)?;
        trace!(%target, id = self.id, seq = self.seq, "echo request sent");

        let mut reply = [0u8; REPLY_BUF_LEN];
        let data_read = self.ip.receive_reply(&mut reply).map_err(EchoError::Network)?;
        let icmp_len = (data_read - IP_HLEN).min(reply.len());

        classify_reply(&reply[..icmp_len], self.id, self.seq, self.matching)?;

        let peer = self.ip.destination_mac();
        debug!(%target, %peer, "echo reply received");
        Ok(peer)
    }

    pub fn identifier(&self) -> u16 {
        self.id
    }

    /// Interfaces kept at discovery, loopback excluded.
    pub fn interfaces(&self) -> &InterfaceList {
        self.ip.interfaces()
    }
}
