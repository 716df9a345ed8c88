//! Dispatch error taxonomy.
//!
//! Everything a caller of [`crate::Dispatcher::submit`] or its relayed
//! stream can observe. Crypto and protocol detail stops here: what
//! crosses the gateway boundary is the variant, never the cause.

use shroud_crypto::CryptoError;
use shroud_wire::{ErrorCode, ProtocolError};

/// Failures surfaced by the dispatcher or its relay stream.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No `Ready` worker exists. Fail-fast: no session is created and
    /// nothing is retried internally.
    #[error("no ready worker available")]
    WorkerUnavailable,

    /// The worker or its transport dropped mid-stream without a terminal
    /// frame. Already-delivered frames stand; there is no resumption.
    #[error("stream interrupted before terminal frame")]
    StreamInterrupted,

    /// The worker signaled a terminal error in-band.
    #[error("worker signaled error: {0:?}")]
    Remote(ErrorCode),

    /// A relayed frame broke the contiguous-index discipline.
    #[error("out-of-order frame: expected {expected}, got {got}")]
    OutOfOrderFrame {
        /// Index the session expected next.
        expected: u64,
        /// Index the frame carried.
        got: u64,
    },

    /// Sealing the envelope failed (oversized prompt, entropy failure).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The wire connection produced a framing error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Dialing the worker endpoint failed.
    #[error("worker connection failed: {0}")]
    Connect(#[from] std::io::Error),
}

impl DispatchError {
    /// The content-free code signaled downstream for this failure.
    ///
    /// This is the only form in which a relay failure crosses the
    /// gateway boundary.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::WorkerUnavailable => ErrorCode::Unavailable,
            DispatchError::Remote(code) => *code,
            DispatchError::Crypto(_) => ErrorCode::CryptoFailure,
            DispatchError::Protocol(_) | DispatchError::OutOfOrderFrame { .. } => {
                ErrorCode::Protocol
            }
            DispatchError::StreamInterrupted | DispatchError::Connect(_) => {
                ErrorCode::EngineFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_content_free() {
        // The downstream signal never carries internal detail, only a
        // coarse category.
        let err = DispatchError::OutOfOrderFrame {
            expected: 4,
            got: 9,
        };
        assert_eq!(err.error_code(), ErrorCode::Protocol);
        assert_eq!(
            DispatchError::WorkerUnavailable.error_code(),
            ErrorCode::Unavailable
        );
        assert_eq!(
            DispatchError::Remote(ErrorCode::Busy).error_code(),
            ErrorCode::Busy
        );
    }
}
