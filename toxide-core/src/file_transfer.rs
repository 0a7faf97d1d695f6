//! File transfers: offers, flow control and pull-based chunk delivery.
//!
//! The sender offers a file; nothing moves until the receiver resumes it.
//! While a transfer runs, the sender's host is asked for chunks through
//! [`events::FileChunkRequest`] and answers with `file_send_chunk`; the
//! receiver's host gets [`events::FileRecvChunk`]. Either side may pause, and
//! data only flows while neither side has the transfer paused. An empty chunk
//! ends the file; the receiver answers it with a cancel, which the sender's
//! host sees as [`events::FileRecvControl`].
//!
//! Outgoing transfers are numbered `0..256` per friend. Incoming ones are
//! exposed as `(sender_number + 1) << 16` so the two ranges never overlap.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::callbacks::Guard;
use crate::events;
use crate::friend::Friend;
use crate::limits::{
    FILE_ID_LENGTH, MAX_CONCURRENT_FILE_PIPES, MAX_FILENAME_LENGTH, MAX_FILE_DATA_SIZE,
    STREAMING_FILE_SIZE,
};
use crate::protocol::Packet;
use crate::session::{Killed, Session, Tox};

pub const FILE_KIND_DATA: u32 = 0;
pub const FILE_KIND_AVATAR: u32 = 1;

/// Content identifier of a file, stable across resumptions.
pub type FileId = [u8; FILE_ID_LENGTH];

const INCOMING_SHIFT: u32 = 16;
/// Outstanding chunk requests per sized transfer.
const REQUEST_WINDOW: usize = 8;
/// Ticks before an unanswered chunk request is raised again.
const CHUNK_RESEND_TICKS: u64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileControl {
    Resume,
    Pause,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Offered, not yet accepted by the receiver.
    Negotiating,
    Active,
    /// Paused by at least one side.
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkRequest {
    position: u64,
    length: usize,
    /// Tick the host was last asked for this chunk.
    issued: u64,
}

pub(crate) struct Transfer {
    kind: u32,
    size: u64,
    file_id: FileId,
    /// Sender: next position to request. Receiver: next position expected.
    position: u64,
    accepted: bool,
    paused_by_us: bool,
    paused_by_peer: bool,
    /// Sender only: requests the host has not answered yet.
    requested: VecDeque<ChunkRequest>,
    /// Sender only: all data went out; the slot is held until the receiver
    /// confirms so the number is not reused under it.
    done: bool,
}

impl Transfer {
    fn new(kind: u32, size: u64, file_id: FileId) -> Self {
        Self {
            kind,
            size,
            file_id,
            position: 0,
            accepted: false,
            paused_by_us: false,
            paused_by_peer: false,
            requested: VecDeque::new(),
            done: false,
        }
    }

    fn state(&self) -> TransferState {
        if !self.accepted {
            TransferState::Negotiating
        } else if self.paused_by_us || self.paused_by_peer {
            TransferState::Paused
        } else {
            TransferState::Active
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.done && self.state() == TransferState::Active
    }

    fn is_streaming(&self) -> bool {
        self.size == STREAMING_FILE_SIZE
    }

    /// Issue new requests up to the window. Streaming transfers keep one
    /// request outstanding since the host decides each chunk's length.
    fn top_up(&mut self, tick: u64) -> Vec<ChunkRequest> {
        let mut issued = Vec::new();
        if self.is_streaming() {
            if self.requested.is_empty() {
                issued.push(ChunkRequest {
                    position: self.position,
                    length: MAX_FILE_DATA_SIZE,
                    issued: tick,
                });
            }
        } else {
            while self.requested.len() + issued.len() < REQUEST_WINDOW && self.position < self.size {
                let length = (self.size - self.position).min(MAX_FILE_DATA_SIZE as u64) as usize;
                issued.push(ChunkRequest {
                    position: self.position,
                    length,
                    issued: tick,
                });
                self.position += length as u64;
            }
        }
        self.requested.extend(issued.iter().copied());
        issued
    }

    /// Requests left unanswered for too long, stamped as raised again.
    fn overdue(&mut self, tick: u64) -> Vec<ChunkRequest> {
        self.requested
            .iter_mut()
            .filter(|r| tick.saturating_sub(r.issued) >= CHUNK_RESEND_TICKS)
            .map(|r| {
                r.issued = tick;
                *r
            })
            .collect()
    }

    /// Every byte of a sized transfer was requested and supplied.
    fn is_complete(&self) -> bool {
        !self.is_streaming() && self.requested.is_empty() && self.position == self.size
    }
}

enum Side {
    Outgoing(u32),
    /// Holds the sender's file number.
    Incoming(u32),
}

fn side(file: u32) -> Side {
    match file >> INCOMING_SHIFT {
        0 => Side::Outgoing(file),
        n => Side::Incoming(n - 1),
    }
}

fn incoming_number(sender_file: u32) -> u32 {
    (sender_file + 1) << INCOMING_SHIFT
}

impl Friend {
    fn transfer(&self, file: u32) -> Option<&Transfer> {
        let transfer = match side(file) {
            Side::Outgoing(n) => self.outgoing.get(n),
            Side::Incoming(n) => self.incoming.get(&n),
        };
        transfer.filter(|t| !t.done)
    }

    fn transfer_mut(&mut self, file: u32) -> Option<&mut Transfer> {
        let transfer = match side(file) {
            Side::Outgoing(n) => self.outgoing.get_mut(n),
            Side::Incoming(n) => self.incoming.get_mut(&n),
        };
        transfer.filter(|t| !t.done)
    }

    fn remove_transfer(&mut self, file: u32) -> Option<Transfer> {
        match side(file) {
            Side::Outgoing(n) => self.outgoing.remove(n),
            Side::Incoming(n) => self.incoming.remove(&n),
        }
    }

    fn has_running_transfer(&self) -> bool {
        self.outgoing.iter().any(|(_, t)| t.is_running())
            || self.incoming.values().any(Transfer::is_running)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FileSendError {
    #[error("no such friend")]
    FriendNotFound,
    #[error("friend is not connected")]
    FriendNotConnected,
    #[error("filename is {actual} bytes, limit is {max}")]
    NameTooLong { max: usize, actual: usize },
    #[error("too many concurrent transfers to this friend")]
    TooMany,
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FileControlError {
    #[error("no such friend")]
    FriendNotFound,
    #[error("friend is not connected")]
    FriendNotConnected,
    #[error("no such transfer")]
    NotFound,
    #[error("transfer is not paused")]
    NotPaused,
    #[error("transfer is paused by the other side or not accepted yet")]
    Denied,
    #[error("transfer is already paused")]
    AlreadyPaused,
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FileSeekError {
    #[error("no such friend")]
    FriendNotFound,
    #[error("friend is not connected")]
    FriendNotConnected,
    #[error("no such transfer")]
    NotFound,
    #[error("seek is only allowed on incoming transfers before they are resumed")]
    Denied,
    #[error("position {position} is beyond the file size {size}")]
    InvalidPosition { position: u64, size: u64 },
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FileSendChunkError {
    #[error("no such friend")]
    FriendNotFound,
    #[error("friend is not connected")]
    FriendNotConnected,
    #[error("no such outgoing transfer")]
    NotFound,
    #[error("transfer is not running")]
    NotTransferring,
    #[error("chunk length does not match the request")]
    InvalidLength,
    #[error("no chunk was requested at this position")]
    WrongPosition,
    #[error(transparent)]
    Killed(#[from] Killed),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FileQueryError {
    #[error("no such friend")]
    FriendNotFound,
    #[error("no such transfer")]
    NotFound,
    #[error(transparent)]
    Killed(#[from] Killed),
}

impl Tox {
    /// Offer a file to a friend. `size` of [`STREAMING_FILE_SIZE`] means unknown
    /// length; a random id is used when `file_id` is `None`.
    pub fn file_send(
        &mut self,
        friend: u32,
        kind: u32,
        size: u64,
        file_id: Option<FileId>,
        filename: &str,
    ) -> Result<u32, FileSendError> {
        let session = self.session_mut()?;
        if filename.len() > MAX_FILENAME_LENGTH {
            return Err(FileSendError::NameTooLong {
                max: MAX_FILENAME_LENGTH,
                actual: filename.len(),
            });
        }
        let record = session
            .friends
            .get_mut(friend)
            .ok_or(FileSendError::FriendNotFound)?;
        if !record.connection.is_connected() {
            return Err(FileSendError::FriendNotConnected);
        }
        if record.outgoing.len() >= MAX_CONCURRENT_FILE_PIPES {
            return Err(FileSendError::TooMany);
        }
        let file_id = file_id.unwrap_or_else(|| {
            let mut id = [0u8; FILE_ID_LENGTH];
            rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut id);
            id
        });
        let file = record.outgoing.insert(Transfer::new(kind, size, file_id)).index;
        let to = record.public_key;
        let offer = Packet::FileOffer {
            file,
            kind,
            size,
            file_id,
            filename: filename.to_owned(),
        };
        if !session.send(&to, &offer) {
            if let Some(record) = session.friends.get_mut(friend) {
                record.outgoing.remove(file);
            }
            return Err(FileSendError::FriendNotConnected);
        }
        tracing::debug!(friend, file, size, "file offered");
        Ok(file)
    }

    /// Accept, pause, resume or cancel a transfer in either direction.
    pub fn file_control(
        &mut self,
        friend: u32,
        file: u32,
        control: FileControl,
    ) -> Result<(), FileControlError> {
        let session = self.session_mut()?;
        let record = session
            .friends
            .get_mut(friend)
            .ok_or(FileControlError::FriendNotFound)?;
        if !record.connection.is_connected() {
            return Err(FileControlError::FriendNotConnected);
        }
        let to = record.public_key;
        let (wire_file, sending) = match side(file) {
            Side::Outgoing(n) => (n, true),
            Side::Incoming(n) => (n, false),
        };
        let transfer = record
            .transfer_mut(file)
            .ok_or(FileControlError::NotFound)?;
        match control {
            FileControl::Resume => {
                if !transfer.accepted {
                    if sending {
                        return Err(FileControlError::Denied);
                    }
                    transfer.accepted = true;
                } else if transfer.paused_by_us {
                    transfer.paused_by_us = false;
                } else if transfer.paused_by_peer {
                    return Err(FileControlError::Denied);
                } else {
                    return Err(FileControlError::NotPaused);
                }
            }
            FileControl::Pause => {
                if !transfer.accepted {
                    return Err(FileControlError::Denied);
                }
                if transfer.paused_by_us {
                    return Err(FileControlError::AlreadyPaused);
                }
                transfer.paused_by_us = true;
            }
            FileControl::Cancel => {
                record.remove_transfer(file);
            }
        }
        session.send(
            &to,
            &Packet::FileControl {
                sending,
                file: wire_file,
                control,
            },
        );
        tracing::debug!(friend, file, ?control, "file control sent");
        Ok(())
    }

    /// Skip the first `position` bytes of an incoming transfer. Only valid
    /// before it is resumed.
    pub fn file_seek(&mut self, friend: u32, file: u32, position: u64) -> Result<(), FileSeekError> {
        let session = self.session_mut()?;
        let record = session
            .friends
            .get_mut(friend)
            .ok_or(FileSeekError::FriendNotFound)?;
        if !record.connection.is_connected() {
            return Err(FileSeekError::FriendNotConnected);
        }
        let to = record.public_key;
        let transfer = record.transfer_mut(file).ok_or(FileSeekError::NotFound)?;
        let Side::Incoming(wire_file) = side(file) else {
            return Err(FileSeekError::Denied);
        };
        if transfer.accepted {
            return Err(FileSeekError::Denied);
        }
        if position >= transfer.size {
            return Err(FileSeekError::InvalidPosition {
                position,
                size: transfer.size,
            });
        }
        transfer.position = position;
        session.send(
            &to,
            &Packet::FileSeek {
                file: wire_file,
                position,
            },
        );
        Ok(())
    }

    /// Answer a chunk request. For streaming transfers an empty chunk ends the file.
    pub fn file_send_chunk(
        &mut self,
        friend: u32,
        file: u32,
        position: u64,
        data: &[u8],
    ) -> Result<(), FileSendChunkError> {
        let session = self.session_mut()?;
        let record = session
            .friends
            .get_mut(friend)
            .ok_or(FileSendChunkError::FriendNotFound)?;
        if !record.connection.is_connected() {
            return Err(FileSendChunkError::FriendNotConnected);
        }
        let to = record.public_key;
        let Side::Outgoing(n) = side(file) else {
            return Err(FileSendChunkError::NotFound);
        };
        let transfer = record
            .outgoing
            .get_mut(n)
            .filter(|t| !t.done)
            .ok_or(FileSendChunkError::NotFound)?;
        if !transfer.is_running() {
            return Err(FileSendChunkError::NotTransferring);
        }
        if data.len() > MAX_FILE_DATA_SIZE {
            return Err(FileSendChunkError::InvalidLength);
        }
        if transfer.is_streaming() && data.is_empty() {
            transfer.done = true;
            transfer.requested.clear();
            session.send(&to, &Packet::FileData { file, data: Vec::new() });
            tracing::debug!(friend, file, "stream finished");
            return Ok(());
        }
        let request = *transfer
            .requested
            .front()
            .ok_or(FileSendChunkError::WrongPosition)?;
        if request.position != position {
            return Err(FileSendChunkError::WrongPosition);
        }
        let fits = if transfer.is_streaming() {
            data.len() <= request.length
        } else {
            data.len() == request.length
        };
        if !fits {
            return Err(FileSendChunkError::InvalidLength);
        }
        transfer.requested.pop_front();
        if transfer.is_streaming() {
            transfer.position = position + data.len() as u64;
        }
        session.send(
            &to,
            &Packet::FileData {
                file,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    pub fn file_get_file_id(&self, friend: u32, file: u32) -> Result<FileId, FileQueryError> {
        let record = self
            .session()?
            .friends
            .get(friend)
            .ok_or(FileQueryError::FriendNotFound)?;
        let transfer = record.transfer(file).ok_or(FileQueryError::NotFound)?;
        Ok(transfer.file_id)
    }

    pub fn file_state(&self, friend: u32, file: u32) -> Result<TransferState, FileQueryError> {
        let record = self
            .session()?
            .friends
            .get(friend)
            .ok_or(FileQueryError::FriendNotFound)?;
        let transfer = record.transfer(file).ok_or(FileQueryError::NotFound)?;
        Ok(transfer.state())
    }

    /// Kind tag the transfer was offered with.
    pub fn file_kind(&self, friend: u32, file: u32) -> Result<u32, FileQueryError> {
        let record = self
            .session()?
            .friends
            .get(friend)
            .ok_or(FileQueryError::FriendNotFound)?;
        let transfer = record.transfer(file).ok_or(FileQueryError::NotFound)?;
        Ok(transfer.kind)
    }
}

impl Session {
    pub(crate) fn has_running_transfers(&self) -> bool {
        self.friends.iter().any(|(_, f)| f.has_running_transfer())
    }

    pub(crate) fn on_file_packet(&mut self, number: u32, packet: Packet) {
        let (Some(key), Some(friend)) = (self.friends.key(number), self.friends.get_mut(number))
        else {
            return;
        };
        let guard = Guard::Friend(key);
        match packet {
            Packet::FileOffer {
                file,
                kind,
                size,
                file_id,
                filename,
            } => {
                if filename.len() > MAX_FILENAME_LENGTH || file as usize >= MAX_CONCURRENT_FILE_PIPES {
                    tracing::warn!(friend = number, file, "invalid file offer dropped");
                    return;
                }
                if friend.incoming.contains_key(&file) {
                    tracing::warn!(friend = number, file, "duplicate file offer dropped");
                    return;
                }
                friend.incoming.insert(file, Transfer::new(kind, size, file_id));
                self.push(
                    guard,
                    events::FileRecv {
                        friend: number,
                        file: incoming_number(file),
                        kind,
                        size,
                        filename,
                    },
                );
            }
            Packet::FileControl {
                sending,
                file,
                control,
            } => {
                let ours = if sending { incoming_number(file) } else { file };
                let confirmed = !sending
                    && control == FileControl::Cancel
                    && friend.outgoing.get(file).is_some_and(|t| t.done);
                if confirmed {
                    friend.outgoing.remove(file);
                    tracing::debug!(friend = number, file, "receiver confirmed the file");
                    self.push(
                        guard,
                        events::FileRecvControl {
                            friend: number,
                            file,
                            control,
                        },
                    );
                    return;
                }
                let Some(transfer) = friend.transfer_mut(ours) else {
                    tracing::trace!(friend = number, file = ours, "control for unknown transfer");
                    return;
                };
                match control {
                    FileControl::Resume if !sending && !transfer.accepted => transfer.accepted = true,
                    FileControl::Resume => transfer.paused_by_peer = false,
                    FileControl::Pause => transfer.paused_by_peer = true,
                    FileControl::Cancel => {
                        friend.remove_transfer(ours);
                    }
                }
                self.push(
                    guard,
                    events::FileRecvControl {
                        friend: number,
                        file: ours,
                        control,
                    },
                );
            }
            Packet::FileSeek { file, position } => match friend.outgoing.get_mut(file) {
                Some(t) if !t.accepted && position < t.size => t.position = position,
                _ => tracing::warn!(friend = number, file, position, "invalid seek dropped"),
            },
            Packet::FileData { file, data } => {
                let ours = incoming_number(file);
                let Some(transfer) = friend.incoming.get_mut(&file) else {
                    tracing::trace!(friend = number, file = ours, "data for unknown transfer");
                    return;
                };
                let position = transfer.position;
                let end = position.saturating_add(data.len() as u64);
                if !transfer.accepted || data.len() > MAX_FILE_DATA_SIZE || end > transfer.size {
                    tracing::warn!(friend = number, file = ours, "unexpected file data dropped");
                    return;
                }
                if data.is_empty() {
                    friend.incoming.remove(&file);
                    let to = friend.public_key;
                    // Tells the sender it can release the transfer.
                    let confirm = Packet::FileControl {
                        sending: false,
                        file,
                        control: FileControl::Cancel,
                    };
                    self.send(&to, &confirm);
                    tracing::debug!(friend = number, file = ours, "file received");
                } else {
                    transfer.position = end;
                }
                self.push(
                    guard,
                    events::FileRecvChunk {
                        friend: number,
                        file: ours,
                        position,
                        data,
                    },
                );
            }
            _ => {}
        }
    }

    /// Per tick: re-issue overdue chunk requests, issue new ones and finish
    /// sized transfers whose data has all been supplied.
    pub(crate) fn file_housekeeping(&mut self) {
        let tick = self.ticks;
        for number in self.friends.indices() {
            let (Some(key), Some(friend)) = (self.friends.key(number), self.friends.get_mut(number))
            else {
                continue;
            };
            if !friend.connection.is_connected() || friend.outgoing.is_empty() {
                continue;
            }
            let to = friend.public_key;
            let mut requests = Vec::new();
            let mut finished = Vec::new();
            for (file, transfer) in friend.outgoing.iter_mut() {
                if !transfer.is_running() {
                    continue;
                }
                requests.extend(transfer.overdue(tick).into_iter().map(|r| (file, r)));
                requests.extend(transfer.top_up(tick).into_iter().map(|r| (file, r)));
                if transfer.is_complete() {
                    transfer.done = true;
                    finished.push((file, transfer.size));
                }
            }
            for (file, request) in requests {
                self.push(
                    Guard::Friend(key),
                    events::FileChunkRequest {
                        friend: number,
                        file,
                        position: request.position,
                        length: request.length,
                    },
                );
            }
            for (file, size) in finished {
                self.send(&to, &Packet::FileData { file, data: Vec::new() });
                tracing::debug!(friend = number, file, "file sent");
                self.push(
                    Guard::Friend(key),
                    events::FileChunkRequest {
                        friend: number,
                        file,
                        position: size,
                        length: 0,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_keeps_directions_apart() {
        assert!(matches!(side(0), Side::Outgoing(0)));
        assert!(matches!(side(255), Side::Outgoing(255)));
        assert_eq!(incoming_number(0), 65536);
        assert!(matches!(side(incoming_number(0)), Side::Incoming(0)));
        assert!(matches!(side(incoming_number(255)), Side::Incoming(255)));
    }

    #[test]
    fn state_machine() {
        let mut t = Transfer::new(FILE_KIND_DATA, 10, [0; FILE_ID_LENGTH]);
        assert_eq!(t.state(), TransferState::Negotiating);
        t.accepted = true;
        assert_eq!(t.state(), TransferState::Active);
        t.paused_by_peer = true;
        assert_eq!(t.state(), TransferState::Paused);
        t.paused_by_peer = false;
        t.paused_by_us = true;
        assert!(!t.is_running());
    }

    #[test]
    fn requests_cover_the_file_exactly() {
        let size = 12345 - 15;
        let mut t = Transfer::new(FILE_KIND_DATA, 12345, [0; FILE_ID_LENGTH]);
        t.position = 15;
        t.accepted = true;
        let mut total = 0u64;
        let mut expected = 15;
        while !t.is_complete() {
            let issued = t.top_up(0);
            assert!(issued.len() <= REQUEST_WINDOW);
            for r in issued {
                assert_eq!(r.position, expected);
                assert!(r.length <= MAX_FILE_DATA_SIZE);
                expected += r.length as u64;
                total += r.length as u64;
                t.requested.pop_front();
            }
        }
        assert_eq!(total, size);
    }

    #[test]
    fn empty_file_completes_immediately() {
        let mut t = Transfer::new(FILE_KIND_AVATAR, 0, [0; FILE_ID_LENGTH]);
        t.accepted = true;
        assert!(t.top_up(0).is_empty());
        assert!(t.is_complete());
    }

    #[test]
    fn overdue_requests_come_back_once_per_timeout() {
        let mut t = Transfer::new(FILE_KIND_DATA, 4000, [0; FILE_ID_LENGTH]);
        t.accepted = true;
        assert_eq!(t.top_up(10).len(), 3);
        assert!(t.overdue(10 + CHUNK_RESEND_TICKS - 1).is_empty());
        let again = t.overdue(10 + CHUNK_RESEND_TICKS);
        assert_eq!(again.iter().map(|r| r.position).collect::<Vec<_>>(), vec![0, 1371, 2742]);
        assert!(t.overdue(10 + CHUNK_RESEND_TICKS + 1).is_empty());
    }

    #[test]
    fn finished_transfer_is_hidden() {
        let mut friend = Friend::restored(crate::snapshot::SavedFriend {
            public_key: *crate::identity::Keypair::generate().public_key(),
            name: String::new(),
            status_message: String::new(),
            request: None,
        });
        let file = friend
            .outgoing
            .insert(Transfer::new(FILE_KIND_DATA, 1, [0; FILE_ID_LENGTH]))
            .index;
        friend.outgoing.get_mut(file).unwrap().done = true;
        assert!(friend.transfer(file).is_none());
        assert!(!friend.has_running_transfer());
        assert_eq!(friend.outgoing.len(), 1);
    }

    #[test]
    fn streaming_keeps_one_request() {
        let mut t = Transfer::new(FILE_KIND_DATA, STREAMING_FILE_SIZE, [0; FILE_ID_LENGTH]);
        t.accepted = true;
        assert_eq!(t.top_up(0).len(), 1);
        assert!(t.top_up(0).is_empty());
        assert!(!t.is_complete());
    }
}
