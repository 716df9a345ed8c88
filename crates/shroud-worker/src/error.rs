//! Worker error taxonomy.

use shroud_crypto::CryptoError;

use crate::engine::EngineError;

/// Failures inside the worker process.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A second envelope arrived while one request is in flight.
    /// Single-accelerator capacity: rejected, not queued.
    #[error("worker busy")]
    Busy,

    /// The generation capability never became ready.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// The generation capability failed mid-sequence.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Envelope or frame crypto failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
