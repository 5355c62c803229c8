//! Datagram output.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::error::RelayError;

/// Multicast destination of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTarget {
    #[serde(default = "default_address")]
    pub address: Ipv4Addr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Multicast time-to-live.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

fn default_address() -> Ipv4Addr {
    Ipv4Addr::new(239, 100, 0, 1)
}
fn default_port() -> u16 {
    1234
}
fn default_ttl() -> u32 {
    2
}

impl Default for NetworkTarget {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            ttl: default_ttl(),
        }
    }
}

impl NetworkTarget {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

/// Where relayed chunks go. One call is one datagram.
pub trait DatagramSink: Send {
    /// Send `payload` as a single datagram, returning the bytes sent.
    fn send(&mut self, payload: &[u8]) -> std::io::Result<usize>;
}

/// UDP sender for a [`NetworkTarget`].
#[derive(Debug)]
pub struct MulticastSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl MulticastSender {
    pub fn new(target: &NetworkTarget) -> Result<Self, RelayError> {
        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(RelayError::Socket)?;
        socket
            .set_multicast_ttl_v4(target.ttl)
            .map_err(RelayError::Socket)?;

        Ok(Self {
            socket,
            target: target.socket_addr(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl DatagramSink for MulticastSender {
    fn send(&mut self, payload: &[u8]) -> std::io::Result<usize> {
        self.socket.send_to(payload, self.target)
    }
}
