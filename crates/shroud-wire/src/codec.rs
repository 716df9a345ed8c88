//! Length-prefixed incremental codec.
//!
//! Works with [`tokio_util::codec::Framed`] over any `AsyncRead +
//! AsyncWrite` transport, and can equally be driven by hand with a
//! [`bytes::BytesMut`] buffer. The decoder makes no assumption that one
//! transport read equals one frame: it buffers until a full length
//! prefix is present, validates the declared length against the
//! configured maximum, then waits for the full body before yielding a
//! message.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::types::WireMessage;

/// Width of the length prefix.
const PREFIX_LEN: usize = 4;

/// Default maximum frame length (matches `ShroudConfig::max_frame_len`).
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024;

/// Incremental encoder/decoder for [`WireMessage`] frames.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    /// Create a codec with an explicit maximum frame length.
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// The configured maximum frame length.
    #[must_use]
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Encoder<WireMessage> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: WireMessage, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        msg.encode_body(&mut body);
        if body.len() > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(PREFIX_LEN + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = WireMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>, ProtocolError> {
        if src.len() < PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&src[..PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_len {
            // Hostile or corrupt peer; fatal before any body buffering.
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if src.len() < PREFIX_LEN + len {
            // Ask the transport for at least the rest of this frame.
            src.reserve(PREFIX_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(PREFIX_LEN);
        let body = src.split_to(len);
        WireMessage::decode_body(&body).map(Some)
    }
}
