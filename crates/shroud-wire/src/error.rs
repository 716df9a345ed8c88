//! Protocol error taxonomy.

/// Framing and message-format failures. Fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A length prefix declared more bytes than the configured maximum.
    /// Guards against malformed or hostile input before any buffering.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A frame body did not parse as a known message.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
