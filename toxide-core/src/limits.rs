//! Fixed sizes and length limits shared by every layer.

/// Long-term and DHT public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Secret key size in bytes.
pub const SECRET_KEY_SIZE: usize = 32;
/// Nospam value size in bytes.
pub const NOSPAM_SIZE: usize = 4;
/// Address checksum size in bytes.
pub const CHECKSUM_SIZE: usize = 2;
/// Friend address: public key + nospam + checksum.
pub const ADDRESS_SIZE: usize = PUBLIC_KEY_SIZE + NOSPAM_SIZE + CHECKSUM_SIZE;

pub const MAX_NAME_LENGTH: usize = 128;
pub const MAX_STATUS_MESSAGE_LENGTH: usize = 1007;
pub const MAX_FRIEND_REQUEST_LENGTH: usize = 1016;
pub const MAX_MESSAGE_LENGTH: usize = 1372;
pub const MAX_FILENAME_LENGTH: usize = 255;
pub const MAX_CONFERENCE_TITLE_LENGTH: usize = 128;

/// Output size of [`crate::hash`].
pub const HASH_LENGTH: usize = 32;
/// Content identifier size of a file transfer.
pub const FILE_ID_LENGTH: usize = 32;

/// Largest payload a single file chunk may carry.
pub const MAX_FILE_DATA_SIZE: usize = 1371;

/// Concurrent outgoing transfers per friend.
pub const MAX_CONCURRENT_FILE_PIPES: usize = 256;

/// Size announced for a stream of unknown length.
pub const STREAMING_FILE_SIZE: u64 = u64::MAX;

/// Default UDP port range scanned when no explicit range is configured.
pub const DEFAULT_START_PORT: u16 = 33445;
pub const DEFAULT_END_PORT: u16 = 33545;
