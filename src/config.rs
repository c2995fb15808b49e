use std::time::Duration;

use clap::ValueEnum;

use crate::net::InterfaceName;

/// How long one receive may block.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound on interfaces kept from discovery.
pub const INTERFACE_MAX_COUNT: usize = 10;
/// Echo request size, ICMP header included.
pub const ECHO_PACKET_LEN: usize = 64;
/// ICMP bytes read from a reply.
pub const REPLY_BUF_LEN: usize = 128;
/// Extra exchanges after a failed first one.
pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_TTL: u8 = 64;

/// Which interface every packet leaves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutgoingInterface {
    /// The first non-loopback interface found at startup. Not a routing
    /// decision: the target may well be reachable only through another one.
    #[default]
    FirstDiscovered,
    Named(InterfaceName),
}

/// Strategy used to learn the target's hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Build Ethernet, IPv4 and ICMP headers by hand and read the peer
    /// address from the reply frame.
    #[default]
    Raw,
    /// Let the kernel build the packet and look the peer up in the ARP table.
    Kernel,
}

/// Which echo replies count as answers to our request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMatching {
    /// Any Echo-Reply, whatever its identifier and sequence.
    #[default]
    Permissive,
    /// Only an Echo-Reply carrying our identifier and sequence.
    Strict,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub outgoing_interface: OutgoingInterface,
    pub reply_matching: ReplyMatching,
    pub recv_timeout: Duration,
    pub retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::default(),
            outgoing_interface: OutgoingInterface::default(),
            reply_matching: ReplyMatching::default(),
            recv_timeout: RECV_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl Config {
    /// Total number of exchanges a session may run.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}
