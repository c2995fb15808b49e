use std::io;

use thiserror::Error;

use super::iface::InterfaceName;

/// Failures of the Ethernet and IPv4 layers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("fail to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("fail to set receive timeout: {0}")]
    ReceiveTimeoutConfig(#[source] io::Error),

    #[error("fail to set TTL: {0}")]
    TtlConfig(#[source] io::Error),

    #[error("can't get list of interfaces: {0}")]
    InterfaceList(#[source] io::Error),

    #[error("no usable network interface found")]
    NoUsableInterface,

    #[error("error while reading interface {name} hardware address or index: {source}")]
    InterfaceLookup {
        name: InterfaceName,
        #[source]
        source: io::Error,
    },

    #[error("error getting IP of interface {name}: {source}")]
    InterfaceAddress {
        name: InterfaceName,
        #[source]
        source: io::Error,
    },

    #[error("no interface selected for receiving, send something first")]
    NoInterfaceSelected,

    #[error("error binding to device {name}: {source}")]
    BindDevice {
        name: InterfaceName,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("no reply within the receive timeout")]
    Timeout,

    #[error("packet receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("too small {layer} packet received ({len} bytes, need at least {min})")]
    Malformed {
        layer: &'static str,
        len: usize,
        min: usize,
    },
}

impl TransportError {
    /// Resource errors make the whole run pointless; everything else only
    /// spoils the current exchange.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            TransportError::Socket(_)
                | TransportError::ReceiveTimeoutConfig(_)
                | TransportError::TtlConfig(_)
                | TransportError::InterfaceList(_)
                | TransportError::NoUsableInterface
        )
    }

    /// Maps a failed receive call, folding the two ways a socket-level
    /// timeout is reported into `Timeout`.
    pub fn from_recv(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Receive(err),
        }
    }
}

/// Outcome classification of one echo exchange.
#[derive(Debug, Error)]
pub enum EchoError {
    #[error("ICMP packet sending failed: {0}")]
    Send(#[source] TransportError),

    #[error("Problems with network: {0}")]
    Network(#[source] TransportError),

    #[error("Host unreachable")]
    HostUnreachable { kind: u8, code: u8 },

    #[error("Unexpected echo reply (id = {id:#06x}, seq = {seq})")]
    UnexpectedReply { id: u16, seq: u16 },

    #[error("Failed to get MAC address from ARP table")]
    NeighbourLookup,
}

impl EchoError {
    /// True when retrying cannot help.
    pub fn is_resource(&self) -> bool {
        match self {
            EchoError::Send(e) | EchoError::Network(e) => e.is_resource(),
            _ => false,
        }
    }
}
