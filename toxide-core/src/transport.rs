//! Engine boundary: the network/crypto layer the session drives.
//!
//! A transport owns ports, DHT membership and pairwise encryption. The session
//! only hands it opaque frames addressed by long-term public key and collects
//! what arrived when it polls during a tick.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::identity::{PublicKey, WireCryptoError};

/// How an instance (or a friend) is currently reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Connection {
    #[default]
    None,
    Tcp,
    Udp,
}

impl Connection {
    pub fn is_connected(self) -> bool {
        self != Connection::None
    }
}

/// A decrypted frame received from a peer.
#[derive(Debug, Clone)]
pub struct Received {
    pub from: PublicKey,
    pub frame: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer is not reachable")]
    Unreachable,
    #[error("UDP is disabled for this instance")]
    UdpDisabled,
    #[error("frame encryption failed: {0}")]
    Crypto(#[from] WireCryptoError),
}

pub trait Transport: Send {
    /// Bound UDP port, `None` when UDP is disabled.
    fn udp_port(&self) -> Option<u16>;

    /// Bound TCP relay port, `None` when the instance runs no relay.
    fn tcp_port(&self) -> Option<u16>;

    /// Per-session DHT public key; other nodes bootstrap against it.
    fn dht_id(&self) -> PublicKey;

    /// Register a UDP bootstrap node. Linking happens while polling.
    fn bootstrap(&mut self, addr: SocketAddr, dht_key: &PublicKey) -> Result<(), TransportError>;

    /// Register a TCP relay. Linking happens while polling.
    fn add_tcp_relay(&mut self, addr: SocketAddr, dht_key: &PublicKey)
        -> Result<(), TransportError>;

    /// Own connection to the network.
    fn connection(&self) -> Connection;

    /// Whether a peer, addressed by long-term key, can be reached right now.
    fn peer_connection(&self, peer: &PublicKey) -> Connection;

    /// Encrypt and send a frame to a peer.
    fn send(&mut self, peer: &PublicKey, frame: &[u8]) -> Result<(), TransportError>;

    /// Advance links and drain everything received since the last poll.
    fn poll(&mut self) -> Vec<Received>;
}
