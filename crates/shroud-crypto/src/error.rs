//! Crypto error taxonomy.

/// Failures at the encryption boundary.
///
/// `TamperDetected` and `UnwrapFailed` intentionally carry no detail:
/// not which byte failed, not which key was used. Nothing about the failure
/// is observable beyond its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Authentication tag did not verify.
    #[error("authentication failed")]
    TamperDetected,

    /// Asymmetric unwrap of the session key failed.
    #[error("key unwrap failed")]
    UnwrapFailed,

    /// Plaintext exceeds the configured maximum.
    #[error("plaintext exceeds limit of {limit} bytes")]
    OversizedPlaintext {
        /// Configured maximum plaintext size.
        limit: usize,
    },

    /// The per-session frame counter is spent; the session key must not
    /// be reused past this point.
    #[error("frame nonce counter exhausted")]
    NonceExhausted,

    /// A frame arrived whose counter is not the next expected value
    /// (replay or reordering).
    #[error("frame counter out of order")]
    OutOfOrderFrame,

    /// The operating system entropy source failed. Fatal, never retried.
    #[error("entropy source failure")]
    EntropyFailure,

    /// AEAD encryption itself failed (plaintext beyond cipher limits).
    #[error("seal failed")]
    SealFailed,
}
