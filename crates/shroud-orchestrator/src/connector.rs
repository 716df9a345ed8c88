//! Transport seam between the dispatcher and workers.
//!
//! The dispatcher drives `RunInference(envelope) -> stream(message)`
//! through [`WorkerConnector`], so the relay logic is independent of how
//! a worker is reached. [`TcpConnector`] is the production transport:
//! one framed TCP connection per session. Tests substitute an in-process
//! connector.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use shroud_wire::{EncryptedEnvelope, FrameCodec, ProtocolError, WireMessage};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DispatchError;

/// Messages arriving from a worker over one session's connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<WireMessage, ProtocolError>> + Send>>;

/// How the dispatcher reaches a worker.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    /// Deliver the envelope and return the worker's reply stream.
    ///
    /// Cancelling `cancel` tears the exchange down; the worker observes
    /// the teardown and abandons generation.
    async fn run_inference(
        &self,
        endpoint: &str,
        envelope: EncryptedEnvelope,
        cancel: CancellationToken,
    ) -> Result<MessageStream, DispatchError>;
}

/// Framed-TCP transport: dial, send the envelope, stream replies.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    max_frame_len: usize,
}

impl TcpConnector {
    /// Connector with the given codec frame limit.
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

#[async_trait]
impl WorkerConnector for TcpConnector {
    async fn run_inference(
        &self,
        endpoint: &str,
        envelope: EncryptedEnvelope,
        cancel: CancellationToken,
    ) -> Result<MessageStream, DispatchError> {
        let stream = TcpStream::connect(endpoint).await?;
        let mut framed = Framed::new(stream, FrameCodec::new(self.max_frame_len));
        framed.send(WireMessage::Envelope(envelope)).await?;

        let endpoint = endpoint.to_string();
        Ok(Box::pin(async_stream::stream! {
            loop {
                let item = tokio::select! {
                    () = cancel.cancelled() => {
                        // Dropping the connection is the cancellation
                        // signal the worker acts on.
                        debug!(endpoint = %endpoint, "session cancelled, closing connection");
                        return;
                    }
                    item = framed.next() => item,
                };
                match item {
                    Some(msg) => yield msg,
                    None => return,
                }
            }
        }))
    }
}
