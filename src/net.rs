pub mod arp;
pub mod checksum;
pub mod error;
pub mod ethernet;
pub mod icmp;
pub mod iface;
pub mod ipv4;
pub mod link;
pub mod rawsock;
pub mod resolver;
mod sys;

#[cfg(test)]
pub(crate) mod mock;

pub use iface::InterfaceName;
pub use resolver::PeerResolver;
