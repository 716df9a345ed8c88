//! Counter-nonce AEAD for the worker → orchestrator return path.
//!
//! Every token chunk is sealed under the session key with a nonce derived
//! from a strictly increasing per-session counter, giving each frame
//! independent authentication without per-frame asymmetric work. The
//! opener enforces exact-next-counter, so replayed or reordered frames
//! are rejected rather than decrypted.
//!
//! Frame nonce layout: `[0x01, 0, 0, 0] ‖ counter u64 BE`. The leading
//! domain byte keeps frame nonces disjoint from the envelope payload
//! nonce (domain `0x00`) that shares the same session key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::CryptoError;
use crate::keys::{SessionKey, NONCE_LEN, TAG_LEN};

/// Domain byte for frame nonces.
pub(crate) const FRAME_DOMAIN: u8 = 0x01;

/// Derive the nonce for a given frame counter.
#[must_use]
pub fn frame_nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = FRAME_DOMAIN;
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// One encrypted token chunk, ready to be framed for the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedFrame {
    /// Strictly increasing frame counter (`frame_index` on the wire).
    pub counter: u64,
    /// Nonce derived from `counter`.
    pub nonce: [u8; NONCE_LEN],
    /// Chunk ciphertext, tag detached.
    pub ciphertext: Vec<u8>,
    /// Authentication tag over the ciphertext.
    pub tag: [u8; TAG_LEN],
}

/// Worker-side frame encryptor. Owns the counter discipline: each seal
/// consumes exactly one counter value and the counter never repeats.
pub struct FrameSealer {
    cipher: ChaCha20Poly1305,
    next: u64,
}

impl FrameSealer {
    /// Create a sealer starting at counter 0.
    #[must_use]
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            next: 0,
        }
    }

    /// Counter the next sealed frame will carry.
    #[must_use]
    pub fn next_counter(&self) -> u64 {
        self.next
    }

    /// Encrypt one token chunk under the next counter nonce.
    pub fn seal_chunk(&mut self, chunk: &[u8]) -> Result<SealedFrame, CryptoError> {
        if self.next == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }
        let counter = self.next;
        let nonce = frame_nonce(counter);
        let combined = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), chunk)
            .map_err(|_| CryptoError::SealFailed)?;
        self.next += 1;

        let tag_start = combined.len() - TAG_LEN;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&combined[tag_start..]);
        let mut ciphertext = combined;
        ciphertext.truncate(tag_start);

        Ok(SealedFrame {
            counter,
            nonce,
            ciphertext,
            tag,
        })
    }
}

/// Receiver-side frame decryptor enforcing counter contiguity.
pub struct FrameOpener {
    cipher: ChaCha20Poly1305,
    expected: u64,
}

impl FrameOpener {
    /// Create an opener expecting counter 0 first.
    #[must_use]
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            expected: 0,
        }
    }

    /// Counter the opener will accept next.
    #[must_use]
    pub fn expected_counter(&self) -> u64 {
        self.expected
    }

    /// Decrypt one frame.
    ///
    /// Rejects any counter that is not exactly the next expected value
    /// ([`CryptoError::OutOfOrderFrame`]) and any nonce that does not
    /// match the counter derivation or tag that does not verify
    /// ([`CryptoError::TamperDetected`]).
    pub fn open_frame(&mut self, frame: &SealedFrame) -> Result<Vec<u8>, CryptoError> {
        if frame.counter != self.expected {
            return Err(CryptoError::OutOfOrderFrame);
        }
        if frame.nonce != frame_nonce(frame.counter) {
            return Err(CryptoError::TamperDetected);
        }
        let mut combined = Vec::with_capacity(frame.ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(&frame.ciphertext);
        combined.extend_from_slice(&frame.tag);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&frame.nonce), combined.as_slice())
            .map_err(|_| CryptoError::TamperDetected)?;
        self.expected += 1;
        Ok(plaintext)
    }
}
