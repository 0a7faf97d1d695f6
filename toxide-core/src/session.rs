//! The instance: one identity, its session state and its callbacks.

use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::callbacks::{Callbacks, Event, Guard, Queued};
use crate::conference::Conference;
use crate::friend::Friend;
use crate::identity::{self, Address, KeyError, Keypair, PublicKey, SecretKey};
use crate::limits::{MAX_NAME_LENGTH, MAX_STATUS_MESSAGE_LENGTH};
use crate::loopback::{BindError, Network};
use crate::options::{Options, Savedata};
use crate::protocol::{Packet, UserStatus};
use crate::slot::SlotTable;
use crate::snapshot::{self, SavedFriend, SavedState, SnapshotError};
use crate::transport::{Connection, Transport, TransportError};
use crate::wire;

/// The instance was killed; every operation fails with this afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("instance was killed")]
pub struct Killed;

#[derive(Debug, thiserror::Error)]
pub enum NewError {
    #[error("cannot bind: {0}")]
    Bind(#[from] BindError),
    #[error("cannot load savedata: {0}")]
    Savedata(#[from] SnapshotError),
    #[error("invalid secret key: {0}")]
    SecretKey(#[from] KeyError),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SetInfoError {
    #[error("value is {actual} bytes, limit is {max}")]
    TooLong { max: usize, actual: usize },
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("cannot resolve host {0:?}")]
    BadHost(String),
    #[error("port must not be zero")]
    BadPort,
    #[error("invalid node key: {0}")]
    BadKey(KeyError),
    #[error("node rejected: {0}")]
    Rejected(#[from] TransportError),
    #[error(transparent)]
    Killed(#[from] Killed),
}

/// Session state behind a live instance.
pub(crate) struct Session {
    pub keypair: Keypair,
    pub nospam: u32,
    pub name: String,
    pub status_message: String,
    pub status: UserStatus,
    pub connection: Connection,
    pub transport: Box<dyn Transport>,
    pub friends: SlotTable<Friend>,
    pub conferences: SlotTable<Conference>,
    pub events: VecDeque<Queued>,
    /// Own info changed since it was last pushed to friends and conferences.
    pub info_dirty: bool,
    /// Keys whose friend request was already reported.
    pub seen_requests: HashSet<PublicKey>,
    pub ticks: u64,
    ipv6_enabled: bool,
}

impl Session {
    fn new(keypair: Keypair, transport: Box<dyn Transport>, ipv6_enabled: bool) -> Self {
        Self {
            keypair,
            nospam: identity::random_nospam(),
            name: String::new(),
            status_message: String::new(),
            status: UserStatus::None,
            connection: Connection::None,
            transport,
            friends: SlotTable::new(),
            conferences: SlotTable::new(),
            events: VecDeque::new(),
            info_dirty: false,
            seen_requests: HashSet::new(),
            ticks: 0,
            ipv6_enabled,
        }
    }

    fn restore(&mut self, state: SavedState) {
        self.nospam = state.nospam;
        self.name = state.name;
        self.status_message = state.status_message;
        self.status = state.status;
        for saved in state.friends {
            self.friends.insert(Friend::restored(saved));
        }
    }

    fn saved_state(&self) -> SavedState {
        SavedState {
            secret_key: *self.keypair.secret_key().as_bytes(),
            nospam: self.nospam,
            name: self.name.clone(),
            status_message: self.status_message.clone(),
            status: self.status,
            friends: self
                .friends
                .iter()
                .map(|(_, f)| SavedFriend {
                    public_key: f.public_key,
                    name: f.name.clone(),
                    status_message: f.status_message.clone(),
                    request: f.request.as_ref().map(|r| (r.nospam, r.message.clone())),
                })
                .collect(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        *self.keypair.public_key()
    }

    /// Queue an event for dispatch later in this tick.
    pub fn push(&mut self, guard: Guard, event: impl Into<Event>) {
        self.events.push_back(Queued {
            guard,
            event: event.into(),
        });
    }

    pub fn is_current(&self, guard: Guard) -> bool {
        match guard {
            Guard::Instance => true,
            Guard::Friend(key) => self.friends.contains_key(key),
            Guard::Conference(key) => self.conferences.contains_key(key),
        }
    }

    /// Frame and send a packet. Failures are logged; returns whether it went out.
    pub fn send(&mut self, to: &PublicKey, packet: &Packet) -> bool {
        let frame = match wire::encode_frame(packet) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %to, %e, "dropping unencodable packet");
                return false;
            }
        };
        match self.transport.send(to, &frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(peer = %to, %e, "send failed");
                false
            }
        }
    }

    fn resolve(&self, host: &str, port: u16, key: &str) -> Result<(SocketAddr, PublicKey), BootstrapError> {
        if port == 0 {
            return Err(BootstrapError::BadPort);
        }
        let key: PublicKey = key.parse().map_err(BootstrapError::BadKey)?;
        if !valid_host(host) {
            return Err(BootstrapError::BadHost(host.to_owned()));
        }
        let addr = (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.find(|a| self.ipv6_enabled || a.is_ipv4()))
            .ok_or_else(|| BootstrapError::BadHost(host.to_owned()))?;
        Ok((addr, key))
    }
}

/// Syntax check before any lookup: an IP literal or dot-separated labels of
/// letters, digits and inner hyphens.
fn valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn check_length(value: &str, max: usize) -> Result<(), SetInfoError> {
    if value.len() > max {
        return Err(SetInfoError::TooLong {
            max,
            actual: value.len(),
        });
    }
    Ok(())
}

/// One messaging instance. Drive it by calling [`Tox::iterate`] every
/// [`Tox::iteration_interval`]; handlers registered with the `on_*` methods
/// run inside `iterate` only.
pub struct Tox {
    pub(crate) session: Option<Session>,
    pub(crate) callbacks: Callbacks,
    /// Set while queued events are being delivered.
    pub(crate) dispatching: bool,
    /// A C host killed the handle from inside a callback; free it once
    /// `iterate` returns.
    pub(crate) free_after_dispatch: bool,
    thread_safe: bool,
}

impl Tox {
    /// Create an instance on the process-wide default network.
    pub fn new(options: Options) -> Result<Self, NewError> {
        Self::with_network(options, &Network::global())
    }

    /// Create an instance on a specific network.
    pub fn with_network(options: Options, network: &Network) -> Result<Self, NewError> {
        let (keypair, saved) = match &options.savedata {
            Savedata::Fresh => (Keypair::generate(), None),
            Savedata::SecretKey(bytes) => {
                let secret = SecretKey::try_from(bytes.as_slice())?;
                (Keypair::from_secret_key(&secret), None)
            }
            Savedata::Snapshot(bytes) => {
                let state = snapshot::decode(bytes)?;
                let secret = SecretKey::from_bytes(state.secret_key);
                (Keypair::from_secret_key(&secret), Some(state))
            }
        };
        let transport = network.attach(&keypair, &options)?;
        let mut session = Session::new(keypair, Box::new(transport), options.ipv6_enabled);
        if let Some(state) = saved {
            session.restore(state);
        }
        tracing::debug!(
            public_key = %session.public_key(),
            friends = session.friends.len(),
            "instance created"
        );
        Ok(Self {
            session: Some(session),
            callbacks: Callbacks::default(),
            dispatching: false,
            free_after_dispatch: false,
            thread_safe: options.thread_safe,
        })
    }

    /// Tear the instance down and release its ports. Idempotent.
    pub fn kill(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(public_key = %session.public_key(), "instance killed");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the instance was created for use from several threads.
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    pub(crate) fn session(&self) -> Result<&Session, Killed> {
        self.session.as_ref().ok_or(Killed)
    }

    pub(crate) fn session_mut(&mut self) -> Result<&mut Session, Killed> {
        self.session.as_mut().ok_or(Killed)
    }

    /// Persistent state: identity, nospam, own info and the friend list.
    pub fn savedata(&self) -> Result<Vec<u8>, SnapshotError> {
        let state = self.session()?.saved_state();
        Ok(snapshot::encode(&state)?)
    }

    pub fn self_address(&self) -> Result<Address, Killed> {
        let session = self.session()?;
        Ok(Address::new(session.public_key(), session.nospam))
    }

    pub fn self_public_key(&self) -> Result<PublicKey, Killed> {
        Ok(self.session()?.public_key())
    }

    pub fn self_secret_key(&self) -> Result<SecretKey, Killed> {
        Ok(self.session()?.keypair.secret_key())
    }

    pub fn self_nospam(&self) -> Result<u32, Killed> {
        Ok(self.session()?.nospam)
    }

    /// Change the nospam part of the address. Requests carrying the old value
    /// are ignored from now on.
    pub fn self_set_nospam(&mut self, nospam: u32) -> Result<(), Killed> {
        self.session_mut()?.nospam = nospam;
        Ok(())
    }

    pub fn self_dht_id(&self) -> Result<PublicKey, Killed> {
        Ok(self.session()?.transport.dht_id())
    }

    pub fn self_udp_port(&self) -> Result<Option<u16>, Killed> {
        Ok(self.session()?.transport.udp_port())
    }

    pub fn self_tcp_port(&self) -> Result<Option<u16>, Killed> {
        Ok(self.session()?.transport.tcp_port())
    }

    /// Connection as of the last tick.
    pub fn self_connection_status(&self) -> Result<Connection, Killed> {
        Ok(self.session()?.connection)
    }

    pub fn self_name(&self) -> Result<String, Killed> {
        Ok(self.session()?.name.clone())
    }

    pub fn self_name_size(&self) -> Result<usize, Killed> {
        Ok(self.session()?.name.len())
    }

    /// Set the display name. Friends and conference peers see it after the next tick.
    pub fn self_set_name(&mut self, name: &str) -> Result<(), SetInfoError> {
        let session = self.session_mut()?;
        check_length(name, MAX_NAME_LENGTH)?;
        session.name = name.to_owned();
        session.info_dirty = true;
        let own = session.public_key();
        for (_, conference) in session.conferences.iter_mut() {
            conference.rename_peer(&own, name);
        }
        Ok(())
    }

    pub fn self_status_message(&self) -> Result<String, Killed> {
        Ok(self.session()?.status_message.clone())
    }

    pub fn self_status_message_size(&self) -> Result<usize, Killed> {
        Ok(self.session()?.status_message.len())
    }

    pub fn self_set_status_message(&mut self, status_message: &str) -> Result<(), SetInfoError> {
        let session = self.session_mut()?;
        check_length(status_message, MAX_STATUS_MESSAGE_LENGTH)?;
        session.status_message = status_message.to_owned();
        session.info_dirty = true;
        Ok(())
    }

    pub fn self_status(&self) -> Result<UserStatus, Killed> {
        Ok(self.session()?.status)
    }

    pub fn self_set_status(&mut self, status: UserStatus) -> Result<(), Killed> {
        let session = self.session_mut()?;
        session.status = status;
        session.info_dirty = true;
        Ok(())
    }

    /// Register a UDP bootstrap node by host, port and hex DHT key.
    pub fn bootstrap(&mut self, host: &str, port: u16, public_key: &str) -> Result<(), BootstrapError> {
        let session = self.session_mut()?;
        let (addr, key) = session.resolve(host, port, public_key)?;
        session.transport.bootstrap(addr, &key)?;
        tracing::debug!(%addr, node = %key, "bootstrap node registered");
        Ok(())
    }

    /// Register a TCP relay by host, port and hex DHT key.
    pub fn add_tcp_relay(&mut self, host: &str, port: u16, public_key: &str) -> Result<(), BootstrapError> {
        let session = self.session_mut()?;
        let (addr, key) = session.resolve(host, port, public_key)?;
        session.transport.add_tcp_relay(addr, &key)?;
        tracing::debug!(%addr, relay = %key, "tcp relay registered");
        Ok(())
    }
}
