//! Hybrid envelope encryption for the orchestrator → worker path.
//!
//! [`seal`] produces everything the dispatcher sends to a worker: the
//! prompt under authenticated ChaCha20-Poly1305 with a fresh session key,
//! and that session key wrapped for the worker's X25519 public key.
//! [`open`] is the worker-side inverse.
//!
//! Wrap construction: ephemeral X25519 ECDH against the worker key,
//! HKDF-SHA256 of the shared secret into a key-encryption key, then an
//! AEAD wrap of the session key. The `wrapped_key` field on the wire is
//! `ephemeral_pk (32) ‖ wrap_nonce (12) ‖ wrapped session key + tag (48)`.
//!
//! Envelope payload nonces carry domain byte `0x00` in their first
//! position; frame nonces use `0x01` (see [`crate::frame`]). The two
//! directions therefore never produce the same `(key, nonce)` pair even
//! though they share the session key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;
use crate::keys::{
    random_bytes, SessionKey, WorkerKeyPair, WorkerPublicKey, KEY_LEN, NONCE_LEN, PUBLIC_KEY_LEN,
    TAG_LEN,
};

/// Domain byte for envelope payload nonces.
pub(crate) const ENVELOPE_DOMAIN: u8 = 0x00;

/// HKDF info string binding the KEK to this protocol version.
const KEK_INFO: &[u8] = b"shroud v1 session key wrap";

/// Exact length of a well-formed `wrapped_key` field.
const WRAPPED_KEY_LEN: usize = PUBLIC_KEY_LEN + NONCE_LEN + KEY_LEN + TAG_LEN;

/// The crypto fields of a sealed prompt.
///
/// Field-for-field this is what travels in the wire envelope message;
/// the request ID header is added by the wire layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Session key wrapped for the worker.
    pub wrapped_key: Vec<u8>,
    /// Payload nonce (domain byte `0x00` + 11 random bytes).
    pub nonce: [u8; NONCE_LEN],
    /// Prompt ciphertext, tag detached.
    pub ciphertext: Vec<u8>,
    /// Authentication tag over the ciphertext.
    pub tag: [u8; TAG_LEN],
}

fn derive_kek(shared_secret: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut kek = [0u8; KEY_LEN];
    // Expand cannot fail for a 32-byte output with SHA-256.
    hk.expand(KEK_INFO, &mut kek)
        .unwrap_or_else(|_| unreachable!("HKDF output length is fixed"));
    kek
}

fn split_tag(mut combined: Vec<u8>) -> (Vec<u8>, [u8; TAG_LEN]) {
    let tag_start = combined.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&combined[tag_start..]);
    combined.truncate(tag_start);
    (combined, tag)
}

/// Seal a plaintext prompt for the given worker.
///
/// Returns the fresh session key (held in the orchestrator's session for
/// return-path verification) alongside the envelope fields. The only
/// non-deterministic failure is entropy exhaustion, which is fatal.
pub fn seal(
    plaintext: &[u8],
    worker_public: &WorkerPublicKey,
    max_plaintext: usize,
) -> Result<(SessionKey, Envelope), CryptoError> {
    if plaintext.len() > max_plaintext {
        return Err(CryptoError::OversizedPlaintext { limit: max_plaintext });
    }

    let session_key = SessionKey::generate()?;

    // Ephemeral ECDH against the worker public key.
    let mut seed = [0u8; KEY_LEN];
    random_bytes(&mut seed)?;
    let ephemeral = StaticSecret::from(seed);
    let ephemeral_pk = PublicKey::from(&ephemeral);
    let shared = *ephemeral
        .diffie_hellman(&worker_public.to_dalek())
        .as_bytes();
    let kek = derive_kek(&shared);

    // Wrap the session key under the KEK.
    let mut wrap_nonce = [0u8; NONCE_LEN];
    random_bytes(&mut wrap_nonce)?;
    let wrapped = ChaCha20Poly1305::new(Key::from_slice(&kek))
        .encrypt(Nonce::from_slice(&wrap_nonce), session_key.as_bytes().as_slice())
        .map_err(|_| CryptoError::SealFailed)?;

    let mut wrapped_key = Vec::with_capacity(WRAPPED_KEY_LEN);
    wrapped_key.extend_from_slice(ephemeral_pk.as_bytes());
    wrapped_key.extend_from_slice(&wrap_nonce);
    wrapped_key.extend_from_slice(&wrapped);

    // Encrypt the payload under the session key.
    let mut payload_nonce = [0u8; NONCE_LEN];
    random_bytes(&mut payload_nonce)?;
    payload_nonce[0] = ENVELOPE_DOMAIN;
    let combined = ChaCha20Poly1305::new(Key::from_slice(session_key.as_bytes()))
        .encrypt(Nonce::from_slice(&payload_nonce), plaintext)
        .map_err(|_| CryptoError::SealFailed)?;
    let (ciphertext, tag) = split_tag(combined);

    Ok((
        session_key,
        Envelope {
            wrapped_key,
            nonce: payload_nonce,
            ciphertext,
            tag,
        },
    ))
}

/// Open a sealed envelope with the worker's private key.
///
/// Returns the unwrapped session key (for return-path frame encryption)
/// and the decrypted prompt. Fails with [`CryptoError::UnwrapFailed`]
/// when the asymmetric unwrap fails and [`CryptoError::TamperDetected`]
/// when the payload tag does not verify; neither reveals anything else,
/// and no partial plaintext is ever returned.
pub fn open(
    envelope: &Envelope,
    keypair: &WorkerKeyPair,
) -> Result<(SessionKey, Vec<u8>), CryptoError> {
    if envelope.wrapped_key.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::UnwrapFailed);
    }

    let mut ephemeral_pk = [0u8; PUBLIC_KEY_LEN];
    ephemeral_pk.copy_from_slice(&envelope.wrapped_key[..PUBLIC_KEY_LEN]);
    let mut wrap_nonce = [0u8; NONCE_LEN];
    wrap_nonce.copy_from_slice(&envelope.wrapped_key[PUBLIC_KEY_LEN..PUBLIC_KEY_LEN + NONCE_LEN]);
    let wrapped = &envelope.wrapped_key[PUBLIC_KEY_LEN + NONCE_LEN..];

    let shared = keypair.diffie_hellman(&PublicKey::from(ephemeral_pk));
    let kek = derive_kek(&shared);
    let key_bytes = ChaCha20Poly1305::new(Key::from_slice(&kek))
        .decrypt(Nonce::from_slice(&wrap_nonce), wrapped)
        .map_err(|_| CryptoError::UnwrapFailed)?;
    let key_arr: [u8; KEY_LEN] = key_bytes
        .try_into()
        .map_err(|_| CryptoError::UnwrapFailed)?;
    let session_key = SessionKey::from_bytes(key_arr);

    if envelope.nonce[0] != ENVELOPE_DOMAIN {
        return Err(CryptoError::TamperDetected);
    }
    let mut combined = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(&envelope.ciphertext);
    combined.extend_from_slice(&envelope.tag);
    let plaintext = ChaCha20Poly1305::new(Key::from_slice(session_key.as_bytes()))
        .decrypt(Nonce::from_slice(&envelope.nonce), combined.as_slice())
        .map_err(|_| CryptoError::TamperDetected)?;

    Ok((session_key, plaintext))
}
