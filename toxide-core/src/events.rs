//! Notification payloads delivered to host handlers during `Tox::iterate`.
//!
//! Each payload type is its own event kind; register a handler for it with
//! `Tox::set_callback` or the matching `Tox::on_*` method.

use crate::conference::ConferenceKind;
use crate::file_transfer::FileControl;
use crate::identity::PublicKey;
use crate::protocol::{MessageKind, UserStatus};
use crate::transport::Connection;

/// Own connection to the network changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfConnectionStatus {
    pub connection: Connection,
}

/// Someone who is not yet a friend asked to become one. Accept with
/// `friend_add_norequest(&public_key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequest {
    pub public_key: PublicKey,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendMessage {
    pub friend: u32,
    pub kind: MessageKind,
    pub text: String,
}

/// The friend acknowledged the message with id `message_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendReadReceipt {
    pub friend: u32,
    pub message_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendName {
    pub friend: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendStatusMessage {
    pub friend: u32,
    pub status_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendStatus {
    pub friend: u32,
    pub status: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendConnectionStatus {
    pub friend: u32,
    pub connection: Connection,
}

/// A friend invited us to a conference. Pass `cookie` to `conference_join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceInvite {
    pub friend: u32,
    pub kind: ConferenceKind,
    pub cookie: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceMessage {
    pub conference: u32,
    pub peer: u32,
    pub kind: MessageKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceTitle {
    pub conference: u32,
    pub peer: u32,
    pub title: String,
}

/// Membership or peer metadata of a conference changed. Peer numbers read
/// before this event may now refer to someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferencePeerListChanged {
    pub conference: u32,
}

/// A friend offers a file. Nothing is transferred until the receiver resumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecv {
    pub friend: u32,
    pub file: u32,
    pub kind: u32,
    pub size: u64,
    pub filename: String,
}

/// Received file data. Empty `data` marks the end of the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecvChunk {
    pub friend: u32,
    pub file: u32,
    pub position: u64,
    pub data: Vec<u8>,
}

/// The other side paused, resumed or cancelled a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecvControl {
    pub friend: u32,
    pub file: u32,
    pub control: FileControl,
}

/// Supply exactly `length` bytes from `position` with `file_send_chunk`.
/// `length == 0` means the transfer is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunkRequest {
    pub friend: u32,
    pub file: u32,
    pub position: u64,
    pub length: usize,
}
