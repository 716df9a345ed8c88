//! Wire message types and their binary layouts.
//!
//! Layouts are fixed-field binary (big-endian lengths), written and read
//! with [`bytes`]. The crypto fields map one-to-one onto
//! [`shroud_crypto::Envelope`] and [`shroud_crypto::SealedFrame`];
//! conversion helpers live here so neither endpoint hand-assembles
//! field sets.

use bytes::{Buf, BufMut, BytesMut};
use shroud_core::ids::RequestId;
use shroud_crypto::frame::SealedFrame;
use shroud_crypto::{Envelope, NONCE_LEN, TAG_LEN};

use crate::error::ProtocolError;

/// Message tag byte: request envelope.
pub(crate) const TAG_ENVELOPE: u8 = 0x01;
/// Message tag byte: token frame.
pub(crate) const TAG_FRAME: u8 = 0x02;
/// Message tag byte: terminal error signal.
pub(crate) const TAG_ERROR: u8 = 0x03;

/// The sealed request as sent orchestrator → worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Correlation ID assigned at submission.
    pub request_id: RequestId,
    /// Session key wrapped under the worker public key.
    pub wrapped_key: Vec<u8>,
    /// Payload nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Prompt ciphertext.
    pub ciphertext: Vec<u8>,
    /// Authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl EncryptedEnvelope {
    /// Attach a request ID to sealed crypto fields.
    #[must_use]
    pub fn new(request_id: RequestId, sealed: Envelope) -> Self {
        Self {
            request_id,
            wrapped_key: sealed.wrapped_key,
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
            tag: sealed.tag,
        }
    }

    /// The crypto fields, for [`shroud_crypto::open`].
    #[must_use]
    pub fn crypto_envelope(&self) -> Envelope {
        Envelope {
            wrapped_key: self.wrapped_key.clone(),
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
            tag: self.tag,
        }
    }
}

/// One authenticated unit of streamed output, worker → orchestrator →
/// gateway. Relayed without modification or decryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenFrame {
    /// Strictly increasing, contiguous per session.
    pub frame_index: u64,
    /// Marks the terminal frame; the only point at which the relay may
    /// close the downstream stream.
    pub is_final: bool,
    /// Counter-derived nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Chunk ciphertext.
    pub ciphertext: Vec<u8>,
    /// Authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl TokenFrame {
    /// Wrap a sealed chunk for the wire.
    #[must_use]
    pub fn from_sealed(sealed: SealedFrame, is_final: bool) -> Self {
        Self {
            frame_index: sealed.counter,
            is_final,
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
            tag: sealed.tag,
        }
    }

    /// The crypto fields, for [`shroud_crypto::FrameOpener`].
    #[must_use]
    pub fn sealed_frame(&self) -> SealedFrame {
        SealedFrame {
            counter: self.frame_index,
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
            tag: self.tag,
        }
    }

    /// Encoded byte size of this frame's wire body (tag byte included).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + 8 + 1 + NONCE_LEN + 4 + self.ciphertext.len() + TAG_LEN
    }
}

/// Content-free failure category signaled in-band to the peer.
///
/// Deliberately coarse: internal failure detail never crosses the
/// process boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// No worker capacity.
    Unavailable = 1,
    /// Worker already holds an in-flight request.
    Busy = 2,
    /// Envelope or frame failed cryptographic verification.
    CryptoFailure = 3,
    /// Generation capability failed.
    EngineFailure = 4,
    /// Peer violated the framing protocol.
    Protocol = 5,
}

impl ErrorCode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Unavailable),
            2 => Some(Self::Busy),
            3 => Some(Self::CryptoFailure),
            4 => Some(Self::EngineFailure),
            5 => Some(Self::Protocol),
            _ => None,
        }
    }
}

/// Any message that can appear inside a length-prefixed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    /// Request envelope (client → worker, once per connection).
    Envelope(EncryptedEnvelope),
    /// Token frame (worker → client).
    Frame(TokenFrame),
    /// Terminal error signal (either direction).
    Error(ErrorCode),
}

impl WireMessage {
    /// Serialize the message body (tag byte first) into `dst`.
    pub fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            WireMessage::Envelope(env) => {
                dst.put_u8(TAG_ENVELOPE);
                dst.put_slice(env.request_id.as_bytes());
                dst.put_u32(env.wrapped_key.len() as u32);
                dst.put_slice(&env.wrapped_key);
                dst.put_slice(&env.nonce);
                dst.put_u32(env.ciphertext.len() as u32);
                dst.put_slice(&env.ciphertext);
                dst.put_slice(&env.tag);
            }
            WireMessage::Frame(frame) => {
                dst.put_u8(TAG_FRAME);
                dst.put_u64(frame.frame_index);
                dst.put_u8(u8::from(frame.is_final));
                dst.put_slice(&frame.nonce);
                dst.put_u32(frame.ciphertext.len() as u32);
                dst.put_slice(&frame.ciphertext);
                dst.put_slice(&frame.tag);
            }
            WireMessage::Error(code) => {
                dst.put_u8(TAG_ERROR);
                dst.put_u8(*code as u8);
            }
        }
    }

    /// Parse a complete message body (tag byte first).
    pub fn decode_body(mut body: &[u8]) -> Result<Self, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::Malformed("empty body"));
        }
        let tag = body.get_u8();
        match tag {
            TAG_ENVELOPE => {
                let request_id = RequestId::from_bytes(take_array::<16>(&mut body, "request id")?);
                let wrapped_key = take_vec(&mut body, "wrapped key")?;
                let nonce = take_array::<NONCE_LEN>(&mut body, "nonce")?;
                let ciphertext = take_vec(&mut body, "ciphertext")?;
                let tag_bytes = take_array::<TAG_LEN>(&mut body, "auth tag")?;
                expect_empty(body)?;
                Ok(WireMessage::Envelope(EncryptedEnvelope {
                    request_id,
                    wrapped_key,
                    nonce,
                    ciphertext,
                    tag: tag_bytes,
                }))
            }
            TAG_FRAME => {
                if body.remaining() < 8 + 1 {
                    return Err(ProtocolError::Malformed("truncated frame header"));
                }
                let frame_index = body.get_u64();
                let is_final = match body.get_u8() {
                    0 => false,
                    1 => true,
                    _ => return Err(ProtocolError::Malformed("bad final flag")),
                };
                let nonce = take_array::<NONCE_LEN>(&mut body, "nonce")?;
                let ciphertext = take_vec(&mut body, "ciphertext")?;
                let tag_bytes = take_array::<TAG_LEN>(&mut body, "auth tag")?;
                expect_empty(body)?;
                Ok(WireMessage::Frame(TokenFrame {
                    frame_index,
                    is_final,
                    nonce,
                    ciphertext,
                    tag: tag_bytes,
                }))
            }
            TAG_ERROR => {
                if body.remaining() < 1 {
                    return Err(ProtocolError::Malformed("truncated error"));
                }
                let code = ErrorCode::from_u8(body.get_u8())
                    .ok_or(ProtocolError::Malformed("unknown error code"))?;
                expect_empty(body)?;
                Ok(WireMessage::Error(code))
            }
            _ => Err(ProtocolError::Malformed("unknown message tag")),
        }
    }
}

fn take_array<const N: usize>(
    body: &mut &[u8],
    what: &'static str,
) -> Result<[u8; N], ProtocolError> {
    if body.remaining() < N {
        return Err(ProtocolError::Malformed(what));
    }
    let mut out = [0u8; N];
    body.copy_to_slice(&mut out);
    Ok(out)
}

fn take_vec(body: &mut &[u8], what: &'static str) -> Result<Vec<u8>, ProtocolError> {
    if body.remaining() < 4 {
        return Err(ProtocolError::Malformed(what));
    }
    let len = body.get_u32() as usize;
    if body.remaining() < len {
        return Err(ProtocolError::Malformed(what));
    }
    let mut out = vec![0u8; len];
    body.copy_to_slice(&mut out);
    Ok(out)
}

fn expect_empty(body: &[u8]) -> Result<(), ProtocolError> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::Malformed("trailing bytes"))
    }
}
