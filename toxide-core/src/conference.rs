//! Conferences: multi-party text rooms with invite cookies and message fan-out.
//!
//! Every member keeps a full peer list. A joining member contacts the
//! inviter, which answers with the member list and announces the newcomer to
//! everyone else. Messages, titles and name changes go directly from the
//! sender to every other peer.

use serde::{Deserialize, Serialize};

use crate::callbacks::Guard;
use crate::events;
use crate::identity::PublicKey;
use crate::limits::{MAX_CONFERENCE_TITLE_LENGTH, MAX_MESSAGE_LENGTH};
use crate::protocol::{MessageKind, Packet, PeerInfo};
use crate::session::{Killed, Session, Tox};
use crate::slot::SlotTable;

pub const CONFERENCE_ID_LENGTH: usize = 32;

/// Random identifier shared by all members of one conference.
pub type ConferenceId = [u8; CONFERENCE_ID_LENGTH];

/// Invite cookie: kind byte followed by the conference id.
pub const CONFERENCE_COOKIE_LENGTH: usize = 1 + CONFERENCE_ID_LENGTH;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConferenceKind {
    #[default]
    Text,
    /// Audio/video capable.
    Av,
}

impl ConferenceKind {
    fn to_byte(self) -> u8 {
        match self {
            ConferenceKind::Text => 0,
            ConferenceKind::Av => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ConferenceKind::Text),
            1 => Some(ConferenceKind::Av),
            _ => None,
        }
    }
}

pub(crate) struct Peer {
    pub public_key: PublicKey,
    pub name: String,
}

pub(crate) struct Conference {
    pub id: ConferenceId,
    pub kind: ConferenceKind,
    pub title: String,
    pub peers: SlotTable<Peer>,
    /// Friend we asked to join through; only they may send the member list
    /// until we have it.
    pub inviter: Option<PublicKey>,
}

impl Conference {
    /// New conference with ourselves as peer 0.
    fn new(id: ConferenceId, kind: ConferenceKind, own: PublicKey, name: &str) -> Self {
        let mut peers = SlotTable::new();
        peers.insert(Peer {
            public_key: own,
            name: name.to_owned(),
        });
        Self {
            id,
            kind,
            title: String::new(),
            peers,
            inviter: None,
        }
    }

    fn peer_by_key(&self, key: &PublicKey) -> Option<u32> {
        self.peers.find(|p| p.public_key == *key)
    }

    /// Everyone but `own`.
    fn others(&self, own: &PublicKey) -> Vec<PublicKey> {
        self.peers
            .iter()
            .map(|(_, p)| p.public_key)
            .filter(|k| k != own)
            .collect()
    }

    /// Returns whether the name changed.
    pub(crate) fn rename_peer(&mut self, key: &PublicKey, name: &str) -> bool {
        let Some(peer) = self.peer_by_key(key).and_then(|n| self.peers.get_mut(n)) else {
            return false;
        };
        if peer.name == name {
            return false;
        }
        peer.name = name.to_owned();
        true
    }

    /// Returns whether the peer was new.
    fn add_peer(&mut self, info: PeerInfo) -> bool {
        if self.peer_by_key(&info.public_key).is_some() {
            return false;
        }
        self.peers.insert(Peer {
            public_key: info.public_key,
            name: info.name,
        });
        true
    }
}

fn make_cookie(kind: ConferenceKind, id: &ConferenceId) -> Vec<u8> {
    let mut cookie = Vec::with_capacity(CONFERENCE_COOKIE_LENGTH);
    cookie.push(kind.to_byte());
    cookie.extend_from_slice(id);
    cookie
}

fn parse_cookie(cookie: &[u8]) -> Option<(ConferenceKind, ConferenceId)> {
    let (&kind, id) = cookie.split_first()?;
    Some((ConferenceKind::from_byte(kind)?, id.try_into().ok()?))
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConferenceError {
    #[error("no such conference")]
    NotFound,
    #[error("no such peer")]
    PeerNotFound,
    #[error("no such friend")]
    FriendNotFound,
    #[error("friend is not connected")]
    FriendNotConnected,
    #[error("malformed invite cookie")]
    InvalidCookie,
    #[error("already in this conference")]
    AlreadyJoined,
    #[error("no other peers in the conference")]
    NoConnection,
    #[error("message is empty")]
    EmptyMessage,
    #[error("value is {actual} bytes, limit is {max}")]
    TooLong { max: usize, actual: usize },
    #[error(transparent)]
    Killed(#[from] Killed),
}

impl Tox {
    fn conference(&self, conference: u32) -> Result<&Conference, ConferenceError> {
        self.session()?
            .conferences
            .get(conference)
            .ok_or(ConferenceError::NotFound)
    }

    fn conference_peer(&self, conference: u32, peer: u32) -> Result<&Peer, ConferenceError> {
        self.conference(conference)?
            .peers
            .get(peer)
            .ok_or(ConferenceError::PeerNotFound)
    }

    /// Create a text conference with only ourselves in it.
    pub fn conference_new(&mut self) -> Result<u32, ConferenceError> {
        let session = self.session_mut()?;
        let mut id = [0u8; CONFERENCE_ID_LENGTH];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut id);
        let conference = Conference::new(id, ConferenceKind::Text, session.public_key(), &session.name);
        let number = session.conferences.insert(conference).index;
        tracing::debug!(conference = number, "conference created");
        Ok(number)
    }

    /// Leave and forget a conference.
    pub fn conference_delete(&mut self, conference: u32) -> Result<(), ConferenceError> {
        let session = self.session_mut()?;
        let removed = session
            .conferences
            .remove(conference)
            .ok_or(ConferenceError::NotFound)?;
        let own = session.public_key();
        for peer in removed.others(&own) {
            session.send(&peer, &Packet::ConferenceLeave { id: removed.id });
        }
        tracing::debug!(conference, "conference deleted");
        Ok(())
    }

    pub fn conference_invite(&mut self, friend: u32, conference: u32) -> Result<(), ConferenceError> {
        let session = self.session_mut()?;
        let record = session
            .friends
            .get(friend)
            .ok_or(ConferenceError::FriendNotFound)?;
        if !record.connection.is_connected() {
            return Err(ConferenceError::FriendNotConnected);
        }
        let to = record.public_key;
        let room = session
            .conferences
            .get(conference)
            .ok_or(ConferenceError::NotFound)?;
        let packet = Packet::ConferenceInvite {
            kind: room.kind,
            id: room.id,
        };
        if !session.send(&to, &packet) {
            return Err(ConferenceError::FriendNotConnected);
        }
        Ok(())
    }

    /// Join the conference a friend invited us to.
    pub fn conference_join(&mut self, friend: u32, cookie: &[u8]) -> Result<u32, ConferenceError> {
        let session = self.session_mut()?;
        let (kind, id) = parse_cookie(cookie).ok_or(ConferenceError::InvalidCookie)?;
        let record = session
            .friends
            .get(friend)
            .ok_or(ConferenceError::FriendNotFound)?;
        if !record.connection.is_connected() {
            return Err(ConferenceError::FriendNotConnected);
        }
        let inviter = record.public_key;
        if session.conferences.find(|c| c.id == id).is_some() {
            return Err(ConferenceError::AlreadyJoined);
        }
        if !session.send(&inviter, &Packet::ConferenceJoin { id }) {
            return Err(ConferenceError::FriendNotConnected);
        }
        let mut conference = Conference::new(id, kind, session.public_key(), &session.name);
        conference.inviter = Some(inviter);
        let number = session.conferences.insert(conference).index;
        tracing::debug!(conference = number, friend, "joining conference");
        Ok(number)
    }

    /// Send to every other peer. Fails when we are alone.
    pub fn conference_send_message(
        &mut self,
        conference: u32,
        kind: MessageKind,
        text: &str,
    ) -> Result<(), ConferenceError> {
        let session = self.session_mut()?;
        if text.is_empty() {
            return Err(ConferenceError::EmptyMessage);
        }
        if text.len() > MAX_MESSAGE_LENGTH {
            return Err(ConferenceError::TooLong {
                max: MAX_MESSAGE_LENGTH,
                actual: text.len(),
            });
        }
        let own = session.public_key();
        let room = session
            .conferences
            .get(conference)
            .ok_or(ConferenceError::NotFound)?;
        let others = room.others(&own);
        if others.is_empty() {
            return Err(ConferenceError::NoConnection);
        }
        let packet = Packet::ConferenceMessage {
            id: room.id,
            kind,
            text: text.to_owned(),
        };
        for peer in others {
            session.send(&peer, &packet);
        }
        Ok(())
    }

    pub fn conference_title(&self, conference: u32) -> Result<String, ConferenceError> {
        Ok(self.conference(conference)?.title.clone())
    }

    pub fn conference_set_title(&mut self, conference: u32, title: &str) -> Result<(), ConferenceError> {
        let session = self.session_mut()?;
        if title.len() > MAX_CONFERENCE_TITLE_LENGTH {
            return Err(ConferenceError::TooLong {
                max: MAX_CONFERENCE_TITLE_LENGTH,
                actual: title.len(),
            });
        }
        let own = session.public_key();
        let room = session
            .conferences
            .get_mut(conference)
            .ok_or(ConferenceError::NotFound)?;
        room.title = title.to_owned();
        let packet = Packet::ConferenceTitle {
            id: room.id,
            title: room.title.clone(),
        };
        for peer in room.others(&own) {
            session.send(&peer, &packet);
        }
        Ok(())
    }

    pub fn conference_kind(&self, conference: u32) -> Result<ConferenceKind, ConferenceError> {
        Ok(self.conference(conference)?.kind)
    }

    pub fn conference_count(&self) -> Result<usize, Killed> {
        Ok(self.session()?.conferences.len())
    }

    /// Conference numbers in ascending order.
    pub fn conference_list(&self) -> Result<Vec<u32>, Killed> {
        Ok(self.session()?.conferences.indices())
    }

    pub fn conference_peer_count(&self, conference: u32) -> Result<usize, ConferenceError> {
        Ok(self.conference(conference)?.peers.len())
    }

    /// Peer numbers in ascending order; ours is included.
    pub fn conference_peer_list(&self, conference: u32) -> Result<Vec<u32>, ConferenceError> {
        Ok(self.conference(conference)?.peers.indices())
    }

    pub fn conference_peer_name(&self, conference: u32, peer: u32) -> Result<String, ConferenceError> {
        Ok(self.conference_peer(conference, peer)?.name.clone())
    }

    pub fn conference_peer_public_key(
        &self,
        conference: u32,
        peer: u32,
    ) -> Result<PublicKey, ConferenceError> {
        Ok(self.conference_peer(conference, peer)?.public_key)
    }

    pub fn conference_peer_number_is_ours(
        &self,
        conference: u32,
        peer: u32,
    ) -> Result<bool, ConferenceError> {
        let key = self.conference_peer(conference, peer)?.public_key;
        Ok(key == self.session()?.public_key())
    }

    /// Names of all peers, in peer-number order.
    pub fn conference_peer_names(&self, conference: u32) -> Result<Vec<String>, ConferenceError> {
        let room = self.conference(conference)?;
        Ok(room.peers.iter().map(|(_, p)| p.name.clone()).collect())
    }

    /// Keys of all peers, in peer-number order.
    pub fn conference_peer_public_keys(
        &self,
        conference: u32,
    ) -> Result<Vec<PublicKey>, ConferenceError> {
        let room = self.conference(conference)?;
        Ok(room.peers.iter().map(|(_, p)| p.public_key).collect())
    }
}

impl Session {
    pub(crate) fn on_conference_invite(&mut self, friend: u32, kind: ConferenceKind, id: ConferenceId) {
        let Some(key) = self.friends.key(friend) else {
            return;
        };
        let cookie = make_cookie(kind, &id);
        self.push(
            Guard::Friend(key),
            events::ConferenceInvite {
                friend,
                kind,
                cookie,
            },
        );
    }

    fn conference_by_id(&self, id: &ConferenceId) -> Option<u32> {
        self.conferences.find(|c| c.id == *id)
    }

    fn peer_list_changed(&mut self, number: u32) {
        if let Some(key) = self.conferences.key(number) {
            self.push(
                Guard::Conference(key),
                events::ConferencePeerListChanged { conference: number },
            );
        }
    }

    /// Conference traffic. Apart from joins, only current members are heard.
    pub(crate) fn on_conference_packet(&mut self, from: PublicKey, packet: Packet) {
        let own = self.public_key();
        let id = match &packet {
            Packet::ConferenceJoin { id }
            | Packet::ConferencePeers { id, .. }
            | Packet::ConferencePeerJoined { id, .. }
            | Packet::ConferenceLeave { id }
            | Packet::ConferencePeerName { id, .. }
            | Packet::ConferenceTitle { id, .. }
            | Packet::ConferenceMessage { id, .. } => *id,
            _ => return,
        };
        let Some(number) = self.conference_by_id(&id) else {
            tracing::trace!(%from, "packet for unknown conference ignored");
            return;
        };
        let Some(key) = self.conferences.key(number) else {
            return;
        };
        let Some(room) = self.conferences.get_mut(number) else {
            return;
        };
        let sender = room.peer_by_key(&from);
        match packet {
            Packet::ConferenceJoin { .. } => {
                let Some(friend) = self.friend_by_key(&from) else {
                    tracing::debug!(%from, "conference join from a stranger ignored");
                    return;
                };
                let name = self
                    .friends
                    .get(friend)
                    .map(|f| f.name.clone())
                    .unwrap_or_default();
                let joiner = PeerInfo {
                    public_key: from,
                    name,
                };
                let Some(room) = self.conferences.get_mut(number) else {
                    return;
                };
                let added = room.add_peer(joiner.clone());
                let members: Vec<PeerInfo> = room
                    .peers
                    .iter()
                    .filter(|(_, p)| p.public_key != from)
                    .map(|(_, p)| PeerInfo {
                        public_key: p.public_key,
                        name: p.name.clone(),
                    })
                    .collect();
                let others: Vec<PublicKey> = room
                    .others(&own)
                    .into_iter()
                    .filter(|k| *k != from)
                    .collect();
                let peers = Packet::ConferencePeers {
                    id,
                    title: room.title.clone(),
                    peers: members,
                };
                self.send(&from, &peers);
                if added {
                    let announce = Packet::ConferencePeerJoined { id, peer: joiner };
                    for peer in others {
                        self.send(&peer, &announce);
                    }
                    tracing::debug!(conference = number, %from, "peer joined");
                    self.peer_list_changed(number);
                }
            }
            Packet::ConferencePeers { title, peers, .. } => {
                if sender.is_none() && room.inviter != Some(from) {
                    tracing::debug!(%from, "unsolicited peer list ignored");
                    return;
                }
                room.inviter = None;
                room.title = title;
                let mut changed = false;
                for peer in peers {
                    if peer.public_key != own {
                        changed |= room.add_peer(peer);
                    }
                }
                let others = room.others(&own);
                let announce = Packet::ConferencePeerName {
                    id,
                    name: self.name.clone(),
                };
                for peer in others {
                    self.send(&peer, &announce);
                }
                if changed {
                    self.peer_list_changed(number);
                }
            }
            _ if sender.is_none() => {
                tracing::trace!(%from, conference = number, "packet from non-member ignored");
            }
            Packet::ConferencePeerJoined { peer, .. } => {
                if peer.public_key != own && room.add_peer(peer) {
                    self.peer_list_changed(number);
                }
            }
            Packet::ConferenceLeave { .. } => {
                if let Some(peer) = sender {
                    room.peers.remove(peer);
                    tracing::debug!(conference = number, %from, "peer left");
                    self.peer_list_changed(number);
                }
            }
            Packet::ConferencePeerName { name, .. } => {
                if room.rename_peer(&from, &name) {
                    self.peer_list_changed(number);
                }
            }
            Packet::ConferenceTitle { title, .. } => {
                if title.len() > MAX_CONFERENCE_TITLE_LENGTH {
                    tracing::warn!(%from, "oversized conference title dropped");
                    return;
                }
                room.title.clone_from(&title);
                if let Some(peer) = sender {
                    self.push(
                        Guard::Conference(key),
                        events::ConferenceTitle {
                            conference: number,
                            peer,
                            title,
                        },
                    );
                }
            }
            Packet::ConferenceMessage { kind, text, .. } => {
                if let Some(peer) = sender {
                    self.push(
                        Guard::Conference(key),
                        events::ConferenceMessage {
                            conference: number,
                            peer,
                            kind,
                            text,
                        },
                    );
                }
            }
            _ => {}
        }
    }

    /// Per tick: push our new name and drop peers that became unreachable.
    pub(crate) fn conference_housekeeping(&mut self, info_dirty: bool) {
        let own = self.public_key();
        for number in self.conferences.indices() {
            let Some(room) = self.conferences.get(number) else {
                continue;
            };
            let id = room.id;
            let gone: Vec<u32> = room
                .peers
                .iter()
                .filter(|(_, p)| p.public_key != own)
                .filter(|(_, p)| !self.transport.peer_connection(&p.public_key).is_connected())
                .map(|(n, _)| n)
                .collect();
            if !gone.is_empty() {
                if let Some(room) = self.conferences.get_mut(number) {
                    for peer in &gone {
                        room.peers.remove(*peer);
                    }
                }
                tracing::debug!(conference = number, dropped = gone.len(), "unreachable peers removed");
                self.peer_list_changed(number);
            }
            if info_dirty {
                let others = self
                    .conferences
                    .get(number)
                    .map(|room| room.others(&own))
                    .unwrap_or_default();
                let announce = Packet::ConferencePeerName {
                    id,
                    name: self.name.clone(),
                };
                for peer in others {
                    self.send(&peer, &announce);
                }
            }
        }
    }
}
