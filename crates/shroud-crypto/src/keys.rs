//! Worker keypairs and session keys.
//!
//! Each worker generates an X25519 keypair before it finishes loading;
//! the public half is exported (base64) to the registry as part of the
//! bootstrap surface. Session keys are fresh 256-bit AEAD keys that live
//! only in memory for one session and are never logged or persisted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;

/// Symmetric key length (ChaCha20-Poly1305).
pub const KEY_LEN: usize = 32;
/// AEAD nonce length.
pub const NONCE_LEN: usize = 12;
/// AEAD authentication tag length.
pub const TAG_LEN: usize = 16;
/// X25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Fill `buf` from the OS entropy source.
pub(crate) fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| CryptoError::EntropyFailure)
}

/// Ephemeral symmetric key for one session.
///
/// Exists only in memory for the session's lifetime. The `Debug` impl is
/// redacted so the key cannot leak through logging.
#[derive(Clone)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Generate a fresh session key. Fails only on entropy failure.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        random_bytes(&mut key)?;
        Ok(Self(key))
    }

    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([redacted])")
    }
}

/// A worker's exported public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WorkerPublicKey([u8; PUBLIC_KEY_LEN]);

impl WorkerPublicKey {
    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Base64 export used on the worker bootstrap surface.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse a base64-exported public key.
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(s).map_err(|_| CryptoError::UnwrapFailed)?;
        let arr: [u8; PUBLIC_KEY_LEN] =
            bytes.try_into().map_err(|_| CryptoError::UnwrapFailed)?;
        Ok(Self(arr))
    }

    pub(crate) fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<[u8; PUBLIC_KEY_LEN]> for WorkerPublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for WorkerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerPublicKey({})", self.to_base64())
    }
}

/// A worker's X25519 keypair.
///
/// The secret half never leaves the worker process.
pub struct WorkerKeyPair {
    secret: StaticSecret,
    public: WorkerPublicKey,
}

impl WorkerKeyPair {
    /// Generate a keypair. Fails only on entropy failure.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; KEY_LEN];
        random_bytes(&mut seed)?;
        let secret = StaticSecret::from(seed);
        let public = WorkerPublicKey(*PublicKey::from(&secret).as_bytes());
        Ok(Self { secret, public })
    }

    /// The exportable public half.
    #[must_use]
    pub fn public_key(&self) -> WorkerPublicKey {
        self.public
    }

    pub(crate) fn diffie_hellman(&self, their_public: &PublicKey) -> [u8; KEY_LEN] {
        *self.secret.diffie_hellman(their_public).as_bytes()
    }
}

impl std::fmt::Debug for WorkerKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerKeyPair(public: {})", self.public.to_base64())
    }
}
