use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::{debug, info};

use super::arp;
use super::error::{EchoError, TransportError};
use super::ethernet::MacAddr;
use super::icmp::{classify_reply, echo_identifier, EchoClient, EchoPacket};
use super::ipv4::{Ipv4Header, IP_HLEN};
use super::link::LinkSocket;
use super::rawsock::IcmpSocket;
use crate::config::{Config, Mode, OutgoingInterface, ReplyMatching, DEFAULT_TTL, REPLY_BUF_LEN};

/// Learns the hardware address a given IPv4 target answers from.
pub trait PeerResolver {
    /// Runs one echo exchange with `target`.
    fn resolve(&mut self, target: Ipv4Addr) -> Result<MacAddr, EchoError>;
}

impl<S: LinkSocket> PeerResolver for EchoClient<S> {
    fn resolve(&mut self, target: Ipv4Addr) -> Result<MacAddr, EchoError> {
        self.ping(target)
    }
}

/// Opens the resolver `config.mode` names.
pub fn open(config: &Config) -> Result<Box<dyn PeerResolver>, TransportError> {
    Ok(match config.mode {
        Mode::Raw => {
            let client = EchoClient::open(config)?;
            debug!(id = client.identifier(), "echo identifier");
            for iface in client.interfaces().iter() {
                debug!(name = %iface.name, mac = %iface.mac, "interface discovered");
            }
            if let OutgoingInterface::Named(name) = &config.outgoing_interface {
                if client.interfaces().find(name).is_none() {
                    info!(iface = %name, "requested interface was not discovered, sending anyway");
                }
            }
            Box::new(client)
        }
        Mode::Kernel => Box::new(KernelPinger::open(config)?),
    })
}

/// Echo over a kernel ICMP socket, peer address from the ARP table.
pub struct KernelPinger {
    sock: IcmpSocket,
    id: u16,
    matching: ReplyMatching,
}

impl KernelPinger {
    pub fn open(config: &Config) -> Result<Self, TransportError> {
        Ok(KernelPinger {
            sock: IcmpSocket::new(DEFAULT_TTL, config.recv_timeout)?,
            id: echo_identifier(),
            matching: config.reply_matching,
        })
    }
}

impl PeerResolver for KernelPinger {
    fn resolve(&mut self, target: Ipv4Addr) -> Result<MacAddr, EchoError> {
        let request = EchoPacket::new_echo_req(self.id, 0);
        let dst = SocketAddr::new(IpAddr::V4(target), 0);
        self.sock
            .sendto(&request.raw(), dst)
            .map_err(|e| EchoError::Send(TransportError::Send(e)))?;

        let mut buf = [0u8; REPLY_BUF_LEN];
        let (n, from) = self
            .sock
            .recvfrom(&mut buf)
            .map_err(|e| EchoError::Network(TransportError::from_recv(e)))?;
        debug!(?from, n, "icmp reply received");

        let icmp = strip_ip_header(&buf[..n.min(buf.len())])?;
        classify_reply(icmp, self.id, 0, self.matching)?;

        match arp::lookup(target) {
            Ok(Some(mac)) => Ok(mac),
            Ok(None) => Err(EchoError::NeighbourLookup),
            Err(err) => {
                debug!(%target, "neighbour table lookup failed: {err}");
                Err(EchoError::NeighbourLookup)
            }
        }
    }
}

/// Raw ICMP sockets deliver the IP header too; skip it, options included.
fn strip_ip_header(packet: &[u8]) -> Result<&[u8], EchoError> {
    let malformed = || {
        EchoError::Network(TransportError::Malformed {
            layer: "ip",
            len: packet.len(),
            min: IP_HLEN,
        })
    };
    let header = Ipv4Header::decode(packet).ok_or_else(malformed)?;
    packet.get(header.header_len().max(IP_HLEN)..).ok_or_else(malformed)
}
