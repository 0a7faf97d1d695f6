//! Savedata blob: magic, bincode body, SHA-256 of the body.
//!
//! The blob is opaque to hosts. Encoding is deterministic, so saving a freshly
//! restored instance reproduces the same bytes.

use serde::{Deserialize, Serialize};

use crate::hash;
use crate::identity::PublicKey;
use crate::limits::{HASH_LENGTH, SECRET_KEY_SIZE};
use crate::protocol::UserStatus;
use crate::session::Killed;

const MAGIC: [u8; 4] = *b"TXS\x01";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SavedFriend {
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
    /// Friend request still waiting for the peer: nospam and message.
    pub request: Option<(u32, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SavedState {
    pub secret_key: [u8; SECRET_KEY_SIZE],
    pub nospam: u32,
    pub name: String,
    pub status_message: String,
    pub status: UserStatus,
    pub friends: Vec<SavedFriend>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("savedata is truncated")]
    Truncated,
    #[error("savedata has an unknown format")]
    Magic,
    #[error("savedata checksum mismatch")]
    Checksum,
    #[error("savedata body is malformed: {0}")]
    Decode(#[from] bincode::Error),
    #[error(transparent)]
    Killed(#[from] Killed),
}

pub(crate) fn encode(state: &SavedState) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(state)?;
    let mut out = Vec::with_capacity(MAGIC.len() + body.len() + HASH_LENGTH);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&body);
    out.extend_from_slice(&hash::hash(&body));
    Ok(out)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<SavedState, SnapshotError> {
    if bytes.len() < MAGIC.len() + HASH_LENGTH {
        return Err(SnapshotError::Truncated);
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(SnapshotError::Magic);
    }
    let (body, sum) = bytes[MAGIC.len()..].split_at(bytes.len() - MAGIC.len() - HASH_LENGTH);
    let expected: [u8; HASH_LENGTH] = sum.try_into().map_err(|_| SnapshotError::Truncated)?;
    if !hash::verify(body, &expected) {
        return Err(SnapshotError::Checksum);
    }
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn sample() -> SavedState {
        SavedState {
            secret_key: [7; SECRET_KEY_SIZE],
            nospam: 0xDEAD_BEEF,
            name: "Gentoo".into(),
            status_message: "compiling".into(),
            status: UserStatus::Busy,
            friends: vec![SavedFriend {
                public_key: *Keypair::generate().public_key(),
                name: "bob".into(),
                status_message: String::new(),
                request: Some((42, "add me".into())),
            }],
        }
    }

    #[test]
    fn roundtrip_is_deterministic() {
        let state = sample();
        let blob = encode(&state).unwrap();
        let back = decode(&blob).unwrap();
        assert_eq!(back, state);
        assert_eq!(encode(&back).unwrap(), blob);
    }

    #[test]
    fn garbage_prefix_rejected() {
        let mut blob = b"garbage".to_vec();
        blob.extend(encode(&sample()).unwrap());
        assert!(matches!(decode(&blob), Err(SnapshotError::Magic)));
    }

    #[test]
    fn flipped_byte_rejected() {
        let mut blob = encode(&sample()).unwrap();
        let mid = blob.len() / 2;
        blob[mid] ^= 0x55;
        assert!(matches!(decode(&blob), Err(SnapshotError::Checksum)));
    }

    #[test]
    fn short_input_rejected() {
        assert!(matches!(decode(&MAGIC), Err(SnapshotError::Truncated)));
        assert!(matches!(decode(&[]), Err(SnapshotError::Truncated)));
    }
}
