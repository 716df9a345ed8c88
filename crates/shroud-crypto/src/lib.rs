//! # shroud-crypto
//!
//! Encryption primitives at the orchestrator/enclave trust boundary.
//!
//! Two operations cross that boundary:
//!
//! - **Envelope** ([`envelope::seal`] / [`envelope::open`]): hybrid
//!   encryption of the prompt. A fresh 256-bit session key encrypts the
//!   payload with ChaCha20-Poly1305; the session key itself is wrapped
//!   for the worker via ephemeral X25519 + HKDF-SHA256.
//! - **Frames** ([`frame::FrameSealer`] / [`frame::FrameOpener`]): the
//!   return path reuses the session key with nonces derived from a
//!   strictly increasing per-session counter, so no asymmetric work is
//!   needed per token chunk and no `(key, nonce)` pair ever repeats.
//!
//! Envelope nonces and frame nonces live in disjoint spaces (leading
//! domain byte), which keeps the uniqueness invariant even though both
//! directions share the session key.
//!
//! Decryption failures are deliberately uninformative: a tampered tag and
//! a corrupted wrap report nothing beyond their category, and no partial
//! plaintext is ever returned.

#![deny(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod frame;
pub mod keys;

pub use envelope::{open, seal, Envelope};
pub use error::CryptoError;
pub use frame::{FrameOpener, FrameSealer, SealedFrame};
pub use keys::{SessionKey, WorkerKeyPair, WorkerPublicKey, KEY_LEN, NONCE_LEN, TAG_LEN};
