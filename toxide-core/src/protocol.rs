//! Peer-to-peer session packets and the small enums they carry.

use serde::{Deserialize, Serialize};

use crate::conference::{ConferenceId, ConferenceKind};
use crate::file_transfer::FileControl;
use crate::identity::PublicKey;
use crate::limits::FILE_ID_LENGTH;

/// Current protocol version. Carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Presence status shown to friends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    None,
    Away,
    Busy,
}

/// Friend or conference message flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[default]
    Normal,
    /// `/me`-style action.
    Action,
}

/// Conference member as announced to a joining peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub public_key: PublicKey,
    pub name: String,
}

/// All packet types exchanged between two instances. Encoding is bincode; framing is
/// length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Ask to become friends. `nospam` must match the receiver's current nospam.
    FriendRequest { nospam: u32, message: String },
    /// Friend connection handshake; answered with `Online` by a friend that was offline.
    Online,
    /// Friend connection closed (friend deleted us).
    Offline,
    /// Self metadata pushed on connect and after every change.
    Info {
        name: String,
        status_message: String,
        status: UserStatus,
    },
    Message {
        id: u32,
        kind: MessageKind,
        text: String,
    },
    /// Delivery acknowledgement for `Message::id`.
    Receipt { id: u32 },

    ConferenceInvite { kind: ConferenceKind, id: ConferenceId },
    /// Sent by an invitee to the inviter after accepting an invite.
    ConferenceJoin { id: ConferenceId },
    /// Full membership, sent by the inviter to a peer that just joined.
    ConferencePeers {
        id: ConferenceId,
        title: String,
        peers: Vec<PeerInfo>,
    },
    /// A new member joined through the sender.
    ConferencePeerJoined { id: ConferenceId, peer: PeerInfo },
    /// The sender left the conference.
    ConferenceLeave { id: ConferenceId },
    ConferencePeerName { id: ConferenceId, name: String },
    ConferenceTitle { id: ConferenceId, title: String },
    ConferenceMessage {
        id: ConferenceId,
        kind: MessageKind,
        text: String,
    },

    /// Offer of an outgoing file; `file` is the sender's file number.
    FileOffer {
        file: u32,
        kind: u32,
        size: u64,
        file_id: [u8; FILE_ID_LENGTH],
        filename: String,
    },
    /// `sending` is true when the packet's sender is the sending side of the transfer.
    FileControl {
        sending: bool,
        file: u32,
        control: FileControl,
    },
    /// Receiver asks the sender to start from `position`. Only valid before resume.
    FileSeek { file: u32, position: u64 },
    /// Next chunk of an outgoing file. Empty `data` ends the transfer.
    FileData { file: u32, data: Vec<u8> },
}
