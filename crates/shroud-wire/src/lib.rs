//! # shroud-wire
//!
//! Wire format for the orchestrator ↔ worker streaming exchange.
//!
//! Messages use length-prefixed binary framing:
//!
//! ```text
//! +----------------------+------------------------+
//! | Length (4 bytes, BE) | Payload                |
//! +----------------------+------------------------+
//! ```
//!
//! The payload is `[tag: u8][message body]`. Three message kinds exist:
//! the request envelope (client → worker, exactly once per connection),
//! token frames (worker → client, `is_final` ends the stream), and a
//! content-free error signal.
//!
//! [`codec::FrameCodec`] is an incremental [`tokio_util::codec`]
//! encoder/decoder: it tolerates arbitrary transport split points and
//! rejects length prefixes above the configured maximum before
//! buffering them.

#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod types;

pub use codec::FrameCodec;
pub use error::ProtocolError;
pub use types::{EncryptedEnvelope, ErrorCode, TokenFrame, WireMessage};
