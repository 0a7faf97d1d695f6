//! Identity and crypto: keypairs, friend addresses, session keys, frame encryption.

use std::fmt;
use std::str::FromStr;

use chacha20poly1305::aead::{Aead, KeyInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::limits::{ADDRESS_SIZE, CHECKSUM_SIZE, NOSPAM_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};

/// Long-term (or DHT) public key, 32 bytes X25519.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "bytes_32")] [u8; PUBLIC_KEY_SIZE]);

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// Error parsing a fixed-length token (key, address, file id) from bytes or hex.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum KeyError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("address checksum mismatch")]
    Checksum,
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], KeyError> {
    bytes.try_into().map_err(|_| KeyError::Length {
        expected: N,
        actual: bytes.len(),
    })
}

fn fixed_hex<const N: usize>(s: &str) -> Result<[u8; N], KeyError> {
    if s.len() != N * 2 {
        return Err(KeyError::Length {
            expected: N,
            actual: s.len() / 2,
        });
    }
    fixed(&hex::decode(s)?)
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Create a `PublicKey` from raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, KeyError> {
        fixed(bytes).map(PublicKey)
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        fixed_hex(s).map(PublicKey)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &hex::encode_upper(self.0)[..8])
    }
}

/// Secret half of a long-term identity.
#[derive(Clone, Eq, PartialEq)]
pub struct SecretKey([u8; SECRET_KEY_SIZE]);

impl SecretKey {
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        SecretKey(bytes)
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = KeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, KeyError> {
        fixed(bytes).map(SecretKey)
    }
}

impl FromStr for SecretKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        fixed_hex(s).map(SecretKey)
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// X25519 keypair. Keep secret key private; expose only public key.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild the keypair belonging to a known secret key.
    pub fn from_secret_key(secret: &SecretKey) -> Self {
        Self::from_secret(StaticSecret::from(secret.0))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_key(&self) -> SecretKey {
        SecretKey(self.secret.to_bytes())
    }

    /// Shared secret with another identity's public key. Used to derive session key.
    pub fn shared_secret(&self, other_public: &PublicKey) -> [u8; 32] {
        let other = X25519PublicKey::from(other_public.0);
        self.secret.diffie_hellman(&other).to_bytes()
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_secret(self.secret.clone())
    }
}

/// Friend address: public key, nospam and a 2-byte XOR checksum over both.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Address {
    public_key: PublicKey,
    nospam: u32,
}

impl Address {
    pub fn new(public_key: PublicKey, nospam: u32) -> Self {
        Self { public_key, nospam }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn nospam(&self) -> u32 {
        self.nospam
    }

    fn checksum(head: &[u8]) -> [u8; CHECKSUM_SIZE] {
        let mut sum = [0u8; CHECKSUM_SIZE];
        for (i, b) in head.iter().enumerate() {
            sum[i % CHECKSUM_SIZE] ^= b;
        }
        sum
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_SIZE] {
        let mut out = [0u8; ADDRESS_SIZE];
        out[..PUBLIC_KEY_SIZE].copy_from_slice(self.public_key.as_bytes());
        out[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NOSPAM_SIZE]
            .copy_from_slice(&self.nospam.to_be_bytes());
        let sum = Self::checksum(&out[..PUBLIC_KEY_SIZE + NOSPAM_SIZE]);
        out[PUBLIC_KEY_SIZE + NOSPAM_SIZE..].copy_from_slice(&sum);
        out
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = KeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw: [u8; ADDRESS_SIZE] = fixed(bytes)?;
        let head = &raw[..PUBLIC_KEY_SIZE + NOSPAM_SIZE];
        if Self::checksum(head) != raw[PUBLIC_KEY_SIZE + NOSPAM_SIZE..] {
            return Err(KeyError::Checksum);
        }
        let public_key = PublicKey(fixed(&raw[..PUBLIC_KEY_SIZE])?);
        let nospam = u32::from_be_bytes(fixed(&raw[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NOSPAM_SIZE])?);
        Ok(Self { public_key, nospam })
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        let raw: [u8; ADDRESS_SIZE] = fixed_hex(s)?;
        Address::try_from(raw.as_slice())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.to_bytes()))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Random nospam value for a fresh address.
pub fn random_nospam() -> u32 {
    OsRng.next_u32()
}

/// Derive a 32-byte session key from a shared secret and the two session salts.
/// Salts are ordered so both ends derive the same key.
pub fn derive_session_key(shared_secret: &[u8; 32], salt_a: &[u8], salt_b: &[u8]) -> [u8; 32] {
    let (lo, hi) = if salt_a <= salt_b {
        (salt_a, salt_b)
    } else {
        (salt_b, salt_a)
    };
    let mut hasher = Sha256::new();
    hasher.update(b"toxide-session-v1");
    hasher.update(shared_secret);
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

fn wire_nonce(direction: u8, counter: u64) -> [u8; 12] {
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes[0] = direction;
    nonce_bytes[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce_bytes
}

/// Frame encryption: ChaCha20-Poly1305. Nonce: direction byte + 64-bit counter; never reuse.
pub fn encrypt_wire(
    key: &[u8; 32],
    direction: u8,
    counter: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce_bytes = wire_nonce(direction, counter);
    let nonce = chacha20poly1305::Nonce::from_slice(&nonce_bytes);
    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| WireCryptoError::Encrypt)
}

/// Frame decryption.
pub fn decrypt_wire(
    key: &[u8; 32],
    direction: u8,
    counter: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce_bytes = wire_nonce(direction, counter);
    let nonce = chacha20poly1305::Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| WireCryptoError::Decrypt)
}

#[derive(Debug, thiserror::Error)]
pub enum WireCryptoError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_exchange_symmetric() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let secret_a = a.shared_secret(b.public_key());
        let secret_b = b.shared_secret(a.public_key());
        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn secret_key_rebuilds_same_public_key() {
        let kp = Keypair::generate();
        let again = Keypair::from_secret_key(&kp.secret_key());
        assert_eq!(again.public_key(), kp.public_key());
    }

    #[test]
    fn session_key_independent_of_salt_order() {
        let shared = [7u8; 32];
        assert_eq!(
            derive_session_key(&shared, b"aa", b"bb"),
            derive_session_key(&shared, b"bb", b"aa")
        );
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let plain = b"hello toxide";
        let cipher = encrypt_wire(&key, 1, 0, plain).unwrap();
        let dec = decrypt_wire(&key, 1, 0, &cipher).unwrap();
        assert_eq!(dec.as_slice(), plain);
        assert!(decrypt_wire(&key, 0, 0, &cipher).is_err());
    }

    #[test]
    fn address_hex_roundtrip_and_checksum() {
        let kp = Keypair::generate();
        let addr = Address::new(*kp.public_key(), 0xdead_beef);
        let text = addr.to_string();
        assert_eq!(text.len(), ADDRESS_SIZE * 2);
        assert!(text.starts_with(&kp.public_key().to_string()));
        assert_eq!(text.parse::<Address>().unwrap(), addr);

        let mut raw = addr.to_bytes();
        raw[ADDRESS_SIZE - 1] ^= 0xff;
        assert_eq!(Address::try_from(raw.as_slice()), Err(KeyError::Checksum));
    }

    #[test]
    fn malformed_keys_rejected() {
        assert!(matches!(
            "ABCD".parse::<PublicKey>(),
            Err(KeyError::Length { expected: 32, .. })
        ));
        let bad = format!("XYZAB{}", "0".repeat(59));
        assert!(matches!(bad.parse::<PublicKey>(), Err(KeyError::Hex(_))));
    }
}
