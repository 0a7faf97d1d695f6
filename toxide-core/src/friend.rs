//! Friend directory: friend records, requests, presence and messages.

use std::collections::BTreeMap;

use crate::callbacks::Guard;
use crate::events;
use crate::file_transfer::Transfer;
use crate::identity::{Address, PublicKey};
use crate::limits::{MAX_FRIEND_REQUEST_LENGTH, MAX_MESSAGE_LENGTH};
use crate::protocol::{MessageKind, Packet, UserStatus};
use crate::session::{Killed, Session, Tox};
use crate::slot::SlotTable;
use crate::snapshot::SavedFriend;
use crate::transport::Connection;

/// Ticks between re-sends of an unanswered friend request.
const REQUEST_RESEND_TICKS: u64 = 40;

pub(crate) struct OutgoingRequest {
    pub nospam: u32,
    pub message: String,
    pub last_sent: Option<u64>,
}

pub(crate) struct Friend {
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
    pub status: UserStatus,
    pub connection: Connection,
    /// Our own friend request, until the peer comes online as a friend.
    pub request: Option<OutgoingRequest>,
    pub next_message_id: u32,
    pub outgoing: SlotTable<Transfer>,
    /// Keyed by the sender's file number.
    pub incoming: BTreeMap<u32, Transfer>,
}

impl Friend {
    fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            name: String::new(),
            status_message: String::new(),
            status: UserStatus::None,
            connection: Connection::None,
            request: None,
            next_message_id: 1,
            outgoing: SlotTable::new(),
            incoming: BTreeMap::new(),
        }
    }

    pub(crate) fn restored(saved: SavedFriend) -> Self {
        let mut friend = Self::new(saved.public_key);
        friend.name = saved.name;
        friend.status_message = saved.status_message;
        friend.request = saved.request.map(|(nospam, message)| OutgoingRequest {
            nospam,
            message,
            last_sent: None,
        });
        friend
    }

    pub(crate) fn purge_transfers(&mut self) {
        self.outgoing = SlotTable::new();
        self.incoming.clear();
    }

    fn take_message_id(&mut self) -> u32 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.checked_add(1).unwrap_or(1);
        id
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FriendAddError {
    #[error("friend request message is empty")]
    NoMessage,
    #[error("friend request message is {actual} bytes, limit is {max}")]
    TooLong { max: usize, actual: usize },
    #[error("cannot add own key")]
    OwnKey,
    #[error("already a friend")]
    AlreadySent,
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FriendDeleteError {
    #[error("no friend with number {0}")]
    NotFound(u32),
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FriendQueryError {
    #[error("no such friend")]
    NotFound,
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendMessageError {
    #[error("no such friend")]
    FriendNotFound,
    #[error("friend is not connected")]
    FriendNotConnected,
    #[error("message is empty")]
    Empty,
    #[error("message is {actual} bytes, limit is {max}")]
    TooLong { max: usize, actual: usize },
    #[error(transparent)]
    Killed(#[from] Killed),
}

impl Tox {
    /// Add a friend by address and send them a request once they are reachable.
    pub fn friend_add(&mut self, address: &Address, message: &str) -> Result<u32, FriendAddError> {
        let session = self.session_mut()?;
        if message.is_empty() {
            return Err(FriendAddError::NoMessage);
        }
        if message.len() > MAX_FRIEND_REQUEST_LENGTH {
            return Err(FriendAddError::TooLong {
                max: MAX_FRIEND_REQUEST_LENGTH,
                actual: message.len(),
            });
        }
        let mut friend = session.new_friend(address.public_key())?;
        friend.request = Some(OutgoingRequest {
            nospam: address.nospam(),
            message: message.to_owned(),
            last_sent: None,
        });
        let number = session.friends.insert(friend).index;
        tracing::debug!(friend = number, public_key = %address.public_key(), "friend added with request");
        Ok(number)
    }

    /// Add a friend without sending a request, e.g. to accept one.
    pub fn friend_add_norequest(&mut self, public_key: &PublicKey) -> Result<u32, FriendAddError> {
        let session = self.session_mut()?;
        let friend = session.new_friend(public_key)?;
        let number = session.friends.insert(friend).index;
        tracing::debug!(friend = number, %public_key, "friend added");
        Ok(number)
    }

    /// Remove a friend. The number may be handed out again by a later add.
    pub fn friend_delete(&mut self, friend: u32) -> Result<(), FriendDeleteError> {
        let session = self.session_mut()?;
        let removed = session
            .friends
            .remove(friend)
            .ok_or(FriendDeleteError::NotFound(friend))?;
        if removed.connection.is_connected() {
            session.send(&removed.public_key, &Packet::Offline);
        }
        session.seen_requests.remove(&removed.public_key);
        tracing::debug!(friend, public_key = %removed.public_key, "friend deleted");
        Ok(())
    }

    pub fn friend_by_public_key(&self, public_key: &PublicKey) -> Result<u32, FriendQueryError> {
        self.session()?
            .friend_by_key(public_key)
            .ok_or(FriendQueryError::NotFound)
    }

    pub fn friend_exists(&self, friend: u32) -> Result<bool, Killed> {
        Ok(self.session()?.friends.get(friend).is_some())
    }

    /// Friend numbers in ascending order.
    pub fn friend_list(&self) -> Result<Vec<u32>, Killed> {
        Ok(self.session()?.friends.indices())
    }

    pub fn friend_count(&self) -> Result<usize, Killed> {
        Ok(self.session()?.friends.len())
    }

    fn friend(&self, friend: u32) -> Result<&Friend, FriendQueryError> {
        self.session()?
            .friends
            .get(friend)
            .ok_or(FriendQueryError::NotFound)
    }

    pub fn friend_public_key(&self, friend: u32) -> Result<PublicKey, FriendQueryError> {
        Ok(self.friend(friend)?.public_key)
    }

    pub fn friend_name(&self, friend: u32) -> Result<String, FriendQueryError> {
        Ok(self.friend(friend)?.name.clone())
    }

    pub fn friend_name_size(&self, friend: u32) -> Result<usize, FriendQueryError> {
        Ok(self.friend(friend)?.name.len())
    }

    pub fn friend_status_message(&self, friend: u32) -> Result<String, FriendQueryError> {
        Ok(self.friend(friend)?.status_message.clone())
    }

    pub fn friend_status_message_size(&self, friend: u32) -> Result<usize, FriendQueryError> {
        Ok(self.friend(friend)?.status_message.len())
    }

    pub fn friend_status(&self, friend: u32) -> Result<UserStatus, FriendQueryError> {
        Ok(self.friend(friend)?.status)
    }

    pub fn friend_connection_status(&self, friend: u32) -> Result<Connection, FriendQueryError> {
        Ok(self.friend(friend)?.connection)
    }

    /// Send a message or action. Returns the id echoed by the read receipt.
    pub fn friend_send_message(
        &mut self,
        friend: u32,
        kind: MessageKind,
        text: &str,
    ) -> Result<u32, SendMessageError> {
        let session = self.session_mut()?;
        if text.is_empty() {
            return Err(SendMessageError::Empty);
        }
        if text.len() > MAX_MESSAGE_LENGTH {
            return Err(SendMessageError::TooLong {
                max: MAX_MESSAGE_LENGTH,
                actual: text.len(),
            });
        }
        let record = session
            .friends
            .get_mut(friend)
            .ok_or(SendMessageError::FriendNotFound)?;
        if !record.connection.is_connected() {
            return Err(SendMessageError::FriendNotConnected);
        }
        let id = record.take_message_id();
        let to = record.public_key;
        let packet = Packet::Message {
            id,
            kind,
            text: text.to_owned(),
        };
        if !session.send(&to, &packet) {
            return Err(SendMessageError::FriendNotConnected);
        }
        Ok(id)
    }
}

impl Session {
    fn new_friend(&self, public_key: &PublicKey) -> Result<Friend, FriendAddError> {
        if *public_key == self.public_key() {
            return Err(FriendAddError::OwnKey);
        }
        if self.friend_by_key(public_key).is_some() {
            return Err(FriendAddError::AlreadySent);
        }
        Ok(Friend::new(*public_key))
    }

    pub(crate) fn friend_by_key(&self, public_key: &PublicKey) -> Option<u32> {
        self.friends.find(|f| f.public_key == *public_key)
    }

    /// Update a friend's connection, emitting the change. Losing the
    /// connection ends all transfers with that friend.
    pub(crate) fn set_friend_connection(&mut self, number: u32, connection: Connection) {
        let Some(key) = self.friends.key(number) else {
            return;
        };
        let Some(friend) = self.friends.get_mut(number) else {
            return;
        };
        if friend.connection == connection {
            return;
        }
        friend.connection = connection;
        if !connection.is_connected() {
            friend.purge_transfers();
        }
        tracing::debug!(friend = number, ?connection, "friend connection changed");
        self.push(
            Guard::Friend(key),
            events::FriendConnectionStatus {
                friend: number,
                connection,
            },
        );
    }

    fn info_packet(&self) -> Packet {
        Packet::Info {
            name: self.name.clone(),
            status_message: self.status_message.clone(),
            status: self.status,
        }
    }

    pub(crate) fn on_friend_request(&mut self, from: PublicKey, nospam: u32, message: String) {
        if self.friend_by_key(&from).is_some() {
            tracing::trace!(%from, "friend request from existing friend ignored");
            return;
        }
        if nospam != self.nospam {
            tracing::debug!(%from, "friend request with stale nospam dropped");
            return;
        }
        if message.is_empty() || message.len() > MAX_FRIEND_REQUEST_LENGTH {
            tracing::warn!(%from, len = message.len(), "friend request with invalid message dropped");
            return;
        }
        if !self.seen_requests.insert(from) {
            return;
        }
        self.push(
            Guard::Instance,
            events::FriendRequest {
                public_key: from,
                message,
            },
        );
    }

    /// Packets from an existing friend.
    pub(crate) fn on_friend_packet(&mut self, number: u32, packet: Packet) {
        let (Some(key), Some(friend)) = (self.friends.key(number), self.friends.get_mut(number))
        else {
            return;
        };
        let from = friend.public_key;
        let connected = friend.connection.is_connected();
        match packet {
            Packet::Online => {
                if connected {
                    return;
                }
                friend.request = None;
                let connection = match self.transport.peer_connection(&from) {
                    Connection::None => Connection::Udp,
                    c => c,
                };
                self.set_friend_connection(number, connection);
                let info = self.info_packet();
                self.send(&from, &Packet::Online);
                self.send(&from, &info);
            }
            Packet::Offline => self.set_friend_connection(number, Connection::None),
            _ if !connected => {
                tracing::trace!(friend = number, "packet from offline friend ignored");
            }
            Packet::Info {
                name,
                status_message,
                status,
            } => {
                if friend.name != name {
                    friend.name.clone_from(&name);
                    self.push(Guard::Friend(key), events::FriendName { friend: number, name });
                }
                let Some(friend) = self.friends.get_mut(number) else {
                    return;
                };
                if friend.status_message != status_message {
                    friend.status_message.clone_from(&status_message);
                    self.push(
                        Guard::Friend(key),
                        events::FriendStatusMessage {
                            friend: number,
                            status_message,
                        },
                    );
                }
                let Some(friend) = self.friends.get_mut(number) else {
                    return;
                };
                if friend.status != status {
                    friend.status = status;
                    self.push(Guard::Friend(key), events::FriendStatus { friend: number, status });
                }
            }
            Packet::Message { id, kind, text } => {
                if text.is_empty() || text.len() > MAX_MESSAGE_LENGTH {
                    tracing::warn!(friend = number, len = text.len(), "invalid message dropped");
                    return;
                }
                self.push(
                    Guard::Friend(key),
                    events::FriendMessage {
                        friend: number,
                        kind,
                        text,
                    },
                );
                self.send(&from, &Packet::Receipt { id });
            }
            Packet::Receipt { id } => self.push(
                Guard::Friend(key),
                events::FriendReadReceipt {
                    friend: number,
                    message_id: id,
                },
            ),
            Packet::ConferenceInvite { kind, id } => self.on_conference_invite(number, kind, id),
            Packet::FileOffer { .. }
            | Packet::FileControl { .. }
            | Packet::FileSeek { .. }
            | Packet::FileData { .. } => self.on_file_packet(number, packet),
            other => {
                tracing::warn!(friend = number, packet = ?other, "unexpected friend packet");
            }
        }
    }

    /// Per tick: detect lost or changed connections, push own info, ping
    /// reachable friends that are not connected yet and (re)send requests.
    pub(crate) fn friend_housekeeping(&mut self, info_dirty: bool) {
        let ticks = self.ticks;
        let info = self.info_packet();
        for number in self.friends.indices() {
            let Some(friend) = self.friends.get(number) else {
                continue;
            };
            let to = friend.public_key;
            let current = friend.connection;
            let reachable = self.transport.peer_connection(&to);
            if current.is_connected() {
                if reachable != current {
                    self.set_friend_connection(number, reachable);
                }
                if info_dirty && reachable.is_connected() {
                    self.send(&to, &info);
                }
                continue;
            }
            if !reachable.is_connected() {
                continue;
            }
            let request = self.friends.get_mut(number).and_then(|f| {
                let request = f.request.as_mut()?;
                let due = request
                    .last_sent
                    .map_or(true, |sent| ticks.saturating_sub(sent) >= REQUEST_RESEND_TICKS);
                if !due {
                    return None;
                }
                request.last_sent = Some(ticks);
                Some(Packet::FriendRequest {
                    nospam: request.nospam,
                    message: request.message.clone(),
                })
            });
            if let Some(request) = request {
                tracing::debug!(friend = number, "sending friend request");
                self.send(&to, &request);
            }
            self.send(&to, &Packet::Online);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::loopback::Network;
    use crate::options::Options;

    fn tox() -> Tox {
        let opts = Options {
            local_discovery_enabled: false,
            ..Options::default()
        };
        Tox::with_network(opts, &Network::new()).unwrap()
    }

    fn someone() -> PublicKey {
        *Keypair::generate().public_key()
    }

    #[test]
    fn numbers_are_reused_lowest_first() {
        let mut tox = tox();
        let keys: Vec<_> = (0..3).map(|_| someone()).collect();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(tox.friend_add_norequest(key).unwrap(), i as u32);
        }
        tox.friend_delete(1).unwrap();
        assert_eq!(tox.friend_exists(1), Ok(false));
        assert_eq!(tox.friend_delete(1), Err(FriendDeleteError::NotFound(1)));
        assert_eq!(tox.friend_list().unwrap(), vec![0, 2]);
        assert_eq!(tox.friend_add_norequest(&someone()).unwrap(), 1);
        assert_eq!(tox.friend_count().unwrap(), 3);
        assert_eq!(tox.friend_by_public_key(&keys[2]), Ok(2));
    }

    #[test]
    fn add_rejects_self_duplicates_and_bad_messages() {
        let mut tox = tox();
        let own = tox.self_address().unwrap();
        assert_eq!(tox.friend_add(&own, "hi"), Err(FriendAddError::OwnKey));
        let other = Address::new(someone(), 7);
        assert_eq!(tox.friend_add(&other, ""), Err(FriendAddError::NoMessage));
        let long = "x".repeat(MAX_FRIEND_REQUEST_LENGTH + 1);
        assert!(matches!(
            tox.friend_add(&other, &long),
            Err(FriendAddError::TooLong { .. })
        ));
        assert_eq!(tox.friend_add(&other, "hi"), Ok(0));
        assert_eq!(
            tox.friend_add_norequest(other.public_key()),
            Err(FriendAddError::AlreadySent)
        );
    }

    #[test]
    fn getters_fail_on_stale_number() {
        let mut tox = tox();
        let n = tox.friend_add_norequest(&someone()).unwrap();
        assert_eq!(tox.friend_name(n).unwrap(), "");
        assert_eq!(tox.friend_connection_status(n), Ok(Connection::None));
        tox.friend_delete(n).unwrap();
        assert_eq!(tox.friend_name(n), Err(FriendQueryError::NotFound));
        assert_eq!(tox.friend_status(n), Err(FriendQueryError::NotFound));
    }

    #[test]
    fn send_message_validates() {
        let mut tox = tox();
        let n = tox.friend_add_norequest(&someone()).unwrap();
        assert_eq!(
            tox.friend_send_message(n, MessageKind::Normal, ""),
            Err(SendMessageError::Empty)
        );
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(matches!(
            tox.friend_send_message(n, MessageKind::Normal, &long),
            Err(SendMessageError::TooLong { .. })
        ));
        assert_eq!(
            tox.friend_send_message(n, MessageKind::Normal, "hohoo"),
            Err(SendMessageError::FriendNotConnected)
        );
        assert_eq!(
            tox.friend_send_message(9, MessageKind::Action, "waves"),
            Err(SendMessageError::FriendNotFound)
        );
    }
}
