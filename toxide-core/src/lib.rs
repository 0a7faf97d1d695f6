//! Toxide: session state machine and event bridge for a peer-to-peer
//! encrypted messenger.
//!
//! Host-driven: an instance owns an identity, friends, conferences and file
//! transfers; the host calls [`Tox::iterate`] periodically and receives
//! notifications through handlers registered per event kind.

pub mod conference;
pub mod events;
pub mod ffi;
pub mod file_transfer;
pub mod friend;
pub mod hash;
pub mod identity;
pub mod limits;
pub mod loopback;
pub mod options;
pub mod protocol;
pub mod session;
pub mod shared;
pub mod transport;
pub mod wire;

mod callbacks;
mod scheduler;
mod slot;
mod snapshot;

pub use callbacks::{Handler, Notification};
pub use conference::{ConferenceError, ConferenceId, ConferenceKind};
pub use file_transfer::{
    FileControl, FileControlError, FileId, FileQueryError, FileSeekError, FileSendChunkError,
    FileSendError, TransferState, FILE_KIND_AVATAR, FILE_KIND_DATA,
};
pub use friend::{FriendAddError, FriendDeleteError, FriendQueryError, SendMessageError};
pub use hash::hash;
pub use identity::{Address, KeyError, Keypair, PublicKey, SecretKey};
pub use loopback::{BindError, Network};
pub use options::{Options, OptionsError, Savedata};
pub use protocol::{MessageKind, UserStatus};
pub use session::{BootstrapError, Killed, NewError, SetInfoError, Tox};
pub use shared::{NotThreadSafe, SharedTox};
pub use snapshot::SnapshotError;
pub use transport::{Connection, Transport, TransportError};
