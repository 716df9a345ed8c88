//! Framed TCP front end for one worker.
//!
//! Exposes exactly one operation per connection: the peer sends an
//! envelope, the worker streams sealed frames back, then the connection
//! closes. Anything other than an envelope as the first message is a
//! protocol violation answered with a terminal error.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use shroud_wire::{ErrorCode, FrameCodec, WireMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::WorkerService;

/// TCP listener wrapping a [`WorkerService`].
pub struct WorkerServer {
    service: Arc<WorkerService>,
    max_frame_len: usize,
}

impl WorkerServer {
    /// Wrap a service with the given codec frame limit.
    #[must_use]
    pub fn new(service: Arc<WorkerService>, max_frame_len: usize) -> Self {
        Self {
            service,
            max_frame_len,
        }
    }

    /// Bind the listening socket. Split from [`Self::serve`] so callers
    /// can learn the bound address before accepting.
    pub async fn bind(addr: &str) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Each connection is handled on its own task; the single in-flight
    /// discipline is enforced by the service, not the listener, so a
    /// second concurrent connection is accepted and answered `Busy`.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(worker = %self.service.worker_id(), addr = %local, "worker listening");
        loop {
            let (stream, peer) = tokio::select! {
                () = shutdown.cancelled() => {
                    info!(worker = %self.service.worker_id(), "worker listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };
            let server = Arc::clone(&self);
            let conn_shutdown = shutdown.child_token();
            let _ = tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream, peer, conn_shutdown).await {
                    debug!(peer = %peer, error = %err, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> io::Result<()> {
        let mut framed = Framed::new(stream, FrameCodec::new(self.max_frame_len));

        let first = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            msg = framed.next() => msg,
        };
        let envelope = match first {
            Some(Ok(WireMessage::Envelope(envelope))) => envelope,
            Some(Ok(_)) => {
                warn!(peer = %peer, "first message was not an envelope");
                let _ = framed.send(WireMessage::Error(ErrorCode::Protocol)).await;
                return Ok(());
            }
            Some(Err(err)) => {
                warn!(peer = %peer, error = %err, "undecodable first message");
                let _ = framed.send(WireMessage::Error(ErrorCode::Protocol)).await;
                return Ok(());
            }
            // Peer connected and went away; nothing to answer.
            None => return Ok(()),
        };

        let cancel = shutdown.child_token();
        let mut outgoing = Arc::clone(&self.service).run_inference(envelope, cancel.clone());
        while let Some(msg) = outgoing.next().await {
            if let Err(err) = framed.send(msg).await {
                debug!(peer = %peer, error = %err, "peer gone mid-stream");
                // Abandon generation and drain so the service settles
                // its lifecycle state before the connection task exits.
                cancel.cancel();
                while outgoing.next().await.is_some() {}
                return Ok(());
            }
        }
        framed.flush().await.map_err(io_from_protocol)?;
        Ok(())
    }
}

fn io_from_protocol(err: shroud_wire::ProtocolError) -> io::Error {
    match err {
        shroud_wire::ProtocolError::Io(io) => io,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}
