//! In-process network implementing [`Transport`].
//!
//! Every instance attached to a [`Network`] becomes a node with its own ports,
//! DHT id and inbox. Nodes link through bootstrap, TCP relays or local
//! discovery; once a node has a live link it is connected, and any two
//! connected nodes of the same network reach each other. Frames between two
//! nodes are encrypted with a key derived from both long-term keys and both
//! session DHT ids.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::identity::{self, Keypair, PublicKey};
use crate::options::Options;
use crate::transport::{Connection, Received, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("no free UDP port in {start}..={end}")]
    PortRangeExhausted { start: u16, end: u16 },
    #[error("TCP port {0} is already bound")]
    TcpPortInUse(u16),
    #[error("identity {0} is already attached to this network")]
    DuplicateIdentity(PublicKey),
}

struct Datagram {
    from: PublicKey,
    from_dht: PublicKey,
    counter: u64,
    ciphertext: Vec<u8>,
}

struct PendingLink {
    addr: SocketAddr,
    dht_key: PublicKey,
    relay: bool,
}

struct Node {
    dht_id: PublicKey,
    udp_port: Option<u16>,
    tcp_port: Option<u16>,
    local_discovery: bool,
    udp_links: HashSet<PublicKey>,
    tcp_links: HashSet<PublicKey>,
    pending: Vec<PendingLink>,
    inbox: VecDeque<Datagram>,
}

#[derive(Default)]
struct Hub {
    nodes: HashMap<PublicKey, Node>,
    udp_ports: HashMap<u16, PublicKey>,
    tcp_ports: HashMap<u16, PublicKey>,
}

impl Hub {
    fn connection_of(&self, key: &PublicKey) -> Connection {
        let Some(node) = self.nodes.get(key) else {
            return Connection::None;
        };
        if node.udp_links.iter().any(|k| self.nodes.contains_key(k)) {
            Connection::Udp
        } else if node.tcp_links.iter().any(|k| self.nodes.contains_key(k)) {
            Connection::Tcp
        } else {
            Connection::None
        }
    }

    fn link(&mut self, a: PublicKey, b: PublicKey, relay: bool) {
        for (x, y) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get_mut(&x) {
                if relay {
                    node.tcp_links.insert(y);
                } else {
                    node.udp_links.insert(y);
                }
            }
        }
    }

    fn detach(&mut self, key: &PublicKey) {
        if let Some(node) = self.nodes.remove(key) {
            if let Some(port) = node.udp_port {
                self.udp_ports.remove(&port);
            }
            if let Some(port) = node.tcp_port {
                self.tcp_ports.remove(&port);
            }
        }
        for node in self.nodes.values_mut() {
            node.udp_links.remove(key);
            node.tcp_links.remove(key);
        }
    }
}

/// Shared handle to one in-process network. Cloning shares the network.
#[derive(Clone, Default)]
pub struct Network {
    hub: Arc<Mutex<Hub>>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default network, used by `Tox::new`.
    pub fn global() -> Network {
        static GLOBAL: OnceLock<Network> = OnceLock::new();
        GLOBAL.get_or_init(Network::new).clone()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of attached nodes.
    pub fn node_count(&self) -> usize {
        self.hub().nodes.len()
    }

    /// Attach a node for `keypair`, binding ports as requested by `options`.
    pub fn attach(&self, keypair: &Keypair, options: &Options) -> Result<LoopbackTransport, BindError> {
        let mut hub = self.hub();
        let key = *keypair.public_key();
        if hub.nodes.contains_key(&key) {
            return Err(BindError::DuplicateIdentity(key));
        }
        let udp_port = if options.udp_enabled {
            let (start, end) = options.udp_port_range();
            let port = (start..=end)
                .find(|p| !hub.udp_ports.contains_key(p))
                .ok_or(BindError::PortRangeExhausted { start, end })?;
            Some(port)
        } else {
            None
        };
        let tcp_port = match options.tcp_port {
            0 => None,
            port if hub.tcp_ports.contains_key(&port) => return Err(BindError::TcpPortInUse(port)),
            port => Some(port),
        };
        let dht_id = *Keypair::generate().public_key();
        if let Some(port) = udp_port {
            hub.udp_ports.insert(port, key);
        }
        if let Some(port) = tcp_port {
            hub.tcp_ports.insert(port, key);
        }
        hub.nodes.insert(
            key,
            Node {
                dht_id,
                udp_port,
                tcp_port,
                local_discovery: options.local_discovery_enabled && udp_port.is_some(),
                udp_links: HashSet::new(),
                tcp_links: HashSet::new(),
                pending: Vec::new(),
                inbox: VecDeque::new(),
            },
        );
        tracing::debug!(public_key = %key, ?udp_port, ?tcp_port, "node attached");
        Ok(LoopbackTransport {
            network: self.clone(),
            keypair: keypair.clone(),
            dht_id,
            udp_port,
            tcp_port,
            send_counters: HashMap::new(),
            session_keys: HashMap::new(),
        })
    }
}

/// One node's view of a [`Network`]. Dropping it detaches the node.
pub struct LoopbackTransport {
    network: Network,
    keypair: Keypair,
    dht_id: PublicKey,
    udp_port: Option<u16>,
    tcp_port: Option<u16>,
    send_counters: HashMap<(PublicKey, PublicKey), u64>,
    session_keys: HashMap<(PublicKey, PublicKey), [u8; 32]>,
}

impl LoopbackTransport {
    fn public_key(&self) -> PublicKey {
        *self.keypair.public_key()
    }

    fn session_key(&mut self, peer: PublicKey, peer_dht: PublicKey) -> [u8; 32] {
        let keypair = &self.keypair;
        let own_dht = self.dht_id;
        *self
            .session_keys
            .entry((peer, peer_dht))
            .or_insert_with(|| {
                let shared = keypair.shared_secret(&peer);
                identity::derive_session_key(&shared, own_dht.as_bytes(), peer_dht.as_bytes())
            })
    }

    fn register(&mut self, addr: SocketAddr, dht_key: &PublicKey, relay: bool) {
        let key = self.public_key();
        if let Some(node) = self.network.hub().nodes.get_mut(&key) {
            node.pending.push(PendingLink {
                addr,
                dht_key: *dht_key,
                relay,
            });
        }
    }
}

fn direction(from: &PublicKey, to: &PublicKey) -> u8 {
    u8::from(from > to)
}

impl Transport for LoopbackTransport {
    fn udp_port(&self) -> Option<u16> {
        self.udp_port
    }

    fn tcp_port(&self) -> Option<u16> {
        self.tcp_port
    }

    fn dht_id(&self) -> PublicKey {
        self.dht_id
    }

    fn bootstrap(&mut self, addr: SocketAddr, dht_key: &PublicKey) -> Result<(), TransportError> {
        if self.udp_port.is_none() {
            return Err(TransportError::UdpDisabled);
        }
        self.register(addr, dht_key, false);
        Ok(())
    }

    fn add_tcp_relay(
        &mut self,
        addr: SocketAddr,
        dht_key: &PublicKey,
    ) -> Result<(), TransportError> {
        self.register(addr, dht_key, true);
        Ok(())
    }

    fn connection(&self) -> Connection {
        self.network.hub().connection_of(&self.public_key())
    }

    fn peer_connection(&self, peer: &PublicKey) -> Connection {
        let own = self.public_key();
        if *peer == own {
            return Connection::None;
        }
        let hub = self.network.hub();
        let mine = hub.connection_of(&own);
        let theirs = hub.connection_of(peer);
        if !mine.is_connected() || !theirs.is_connected() {
            return Connection::None;
        }
        mine.min(theirs)
    }

    fn send(&mut self, peer: &PublicKey, frame: &[u8]) -> Result<(), TransportError> {
        let own = self.public_key();
        if !self.peer_connection(peer).is_connected() {
            return Err(TransportError::Unreachable);
        }
        let peer_dht = self
            .network
            .hub()
            .nodes
            .get(peer)
            .map(|n| n.dht_id)
            .ok_or(TransportError::Unreachable)?;
        let key = self.session_key(*peer, peer_dht);
        let counter = self.send_counters.entry((*peer, peer_dht)).or_insert(0);
        let ciphertext = identity::encrypt_wire(&key, direction(&own, peer), *counter, frame)?;
        let datagram = Datagram {
            from: own,
            from_dht: self.dht_id,
            counter: *counter,
            ciphertext,
        };
        *counter += 1;
        let mut hub = self.network.hub();
        let node = hub.nodes.get_mut(peer).ok_or(TransportError::Unreachable)?;
        node.inbox.push_back(datagram);
        Ok(())
    }

    fn poll(&mut self) -> Vec<Received> {
        let own = self.public_key();
        let inbox = {
            let mut hub = self.network.hub();
            let Some(node) = hub.nodes.get_mut(&own) else {
                return Vec::new();
            };
            let pending = std::mem::take(&mut node.pending);
            let discovery = node.local_discovery;
            let mut links = Vec::new();
            let mut keep = Vec::new();
            for link in pending {
                if !link.addr.ip().is_loopback() {
                    tracing::trace!(addr = %link.addr, "bootstrap target outside this network, dropped");
                    continue;
                }
                let port = link.addr.port();
                let target = if link.relay {
                    hub.tcp_ports.get(&port)
                } else {
                    hub.udp_ports.get(&port)
                };
                match target.and_then(|k| hub.nodes.get(k).map(|n| (*k, n.dht_id))) {
                    Some((k, dht)) if dht == link.dht_key && k != own => {
                        links.push((k, link.relay));
                    }
                    _ => keep.push(link),
                }
            }
            if discovery {
                for (k, node) in hub.nodes.iter() {
                    if *k != own && node.local_discovery {
                        links.push((*k, false));
                    }
                }
            }
            for (k, relay) in links {
                hub.link(own, k, relay);
            }
            match hub.nodes.get_mut(&own) {
                Some(node) => {
                    node.pending = keep;
                    std::mem::take(&mut node.inbox)
                }
                None => VecDeque::new(),
            }
        };

        let mut out = Vec::with_capacity(inbox.len());
        for datagram in inbox {
            let key = self.session_key(datagram.from, datagram.from_dht);
            match identity::decrypt_wire(
                &key,
                direction(&datagram.from, &own),
                datagram.counter,
                &datagram.ciphertext,
            ) {
                Ok(frame) => out.push(Received {
                    from: datagram.from,
                    frame,
                }),
                Err(e) => tracing::warn!(from = %datagram.from, %e, "dropping undecryptable frame"),
            }
        }
        out
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        let key = self.public_key();
        self.network.hub().detach(&key);
        tracing::debug!(public_key = %key, "node detached");
    }
}
