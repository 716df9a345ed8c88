//! Request dispatch and the encrypted streaming relay.
//!
//! `submit` binds one tenant request to one `Ready` worker, seals the
//! prompt for that worker, and hands back a bounded stream of the
//! worker's frames, still encrypted and relayed without modification. The
//! relay suspends its worker read when the downstream consumer is slow
//! (the channel bound is the backpressure bound) and propagates
//! downstream disconnects to the worker as cancellation.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use shroud_core::config::ShroudConfig;
use shroud_core::ids::{RequestId, WorkerId};
use shroud_core::logging::loggable_tenant;
use shroud_core::request::TenantRequest;
use shroud_core::state::WorkerState;
use shroud_crypto::SessionKey;
use shroud_wire::{EncryptedEnvelope, FrameCodec, TokenFrame, WireMessage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::{MessageStream, WorkerConnector};
use crate::error::DispatchError;
use crate::metrics::{MetricsSink, SessionMetrics, SessionOutcome};
use crate::registry::WorkerRegistry;
use crate::session::WorkerSession;

/// One accepted request's handle: its ID, the worker it is bound to,
/// the ephemeral key for the tenant-side decryption boundary, and the
/// relayed frame stream.
#[derive(Debug)]
pub struct Submission {
    /// Correlation ID assigned at submission.
    pub request_id: RequestId,
    /// Worker the session is bound to.
    pub worker_id: WorkerId,
    /// Key the downstream consumer decrypts frames with. The relay
    /// itself never applies it to frame content.
    pub session_key: SessionKey,
    /// Relayed frames in index order; a terminal `Err` replaces the
    /// final frame on failure paths.
    pub frames: ReceiverStream<Result<TokenFrame, DispatchError>>,
}

/// Maps accepted requests onto worker sessions and relays the exchange.
pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    connector: Arc<dyn WorkerConnector>,
    sink: Arc<dyn MetricsSink>,
    max_prompt_bytes: usize,
    relay_buffer: usize,
    strict_no_logging: bool,
}

impl Dispatcher {
    /// Assemble a dispatcher over a registry, a transport, and a sink.
    #[must_use]
    pub fn new(
        registry: Arc<WorkerRegistry>,
        connector: Arc<dyn WorkerConnector>,
        sink: Arc<dyn MetricsSink>,
        config: &ShroudConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            sink,
            max_prompt_bytes: config.max_prompt_bytes,
            relay_buffer: config.relay_buffer,
            strict_no_logging: config.strict_no_logging,
        }
    }

    /// Accept one request: assign an ID, pick a worker, seal, dispatch,
    /// and return the relayed stream.
    ///
    /// Fail-fast: with no `Ready` worker this returns
    /// [`DispatchError::WorkerUnavailable`] immediately; no session is
    /// created and only a zero-duration failure record is emitted.
    pub async fn submit(&self, request: TenantRequest) -> Result<Submission, DispatchError> {
        let request_id = RequestId::assign();
        let input_tokens = request.prompt.split_whitespace().count() as u64;
        info!(
            request = %request_id,
            tenant = %loggable_tenant(&request.tenant_id, self.strict_no_logging),
            mode = ?request.mode,
            region = %request.region,
            prompt_bytes = request.prompt.len(),
            "request accepted"
        );

        let worker = match self.registry.select_worker() {
            Ok(worker) => worker,
            Err(err) => {
                debug!(request = %request_id, error = %err, "no capacity");
                let metrics = SessionMetrics::new(request_id, None, input_tokens);
                self.sink.emit(metrics.finish(SessionOutcome::Failed));
                return Err(DispatchError::WorkerUnavailable);
            }
        };
        let metrics = SessionMetrics::new(
            request_id.clone(),
            Some(worker.worker_id.clone()),
            input_tokens,
        );

        let (session_key, sealed) = match shroud_crypto::seal(
            request.prompt.as_bytes(),
            &worker.public_key,
            self.max_prompt_bytes,
        ) {
            Ok(sealed) => sealed,
            Err(err) => {
                // The worker never received an envelope; hand it back.
                let _ = self.registry.release(&worker.worker_id);
                self.sink.emit(metrics.finish(SessionOutcome::Failed));
                return Err(err.into());
            }
        };
        let envelope = EncryptedEnvelope::new(request_id.clone(), sealed);
        let session = WorkerSession::new(
            request_id.clone(),
            worker.worker_id.clone(),
            session_key.clone(),
        );

        let cancel = CancellationToken::new();
        let upstream = match self
            .connector
            .run_inference(&worker.endpoint, envelope, cancel.clone())
            .await
        {
            Ok(upstream) => upstream,
            Err(err) => {
                warn!(
                    request = %request_id,
                    worker = %worker.worker_id,
                    error = %err,
                    "dispatch failed before streaming"
                );
                let _ = self.registry.mark_failed(&worker.worker_id);
                self.sink.emit(metrics.finish(SessionOutcome::Failed));
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(self.relay_buffer);
        let relay = Relay {
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            session,
            metrics,
            cancel,
        };
        let _ = tokio::spawn(relay.run(upstream, tx));

        Ok(Submission {
            request_id,
            worker_id: worker.worker_id,
            session_key,
            frames: ReceiverStream::new(rx),
        })
    }
}

struct Relay {
    registry: Arc<WorkerRegistry>,
    sink: Arc<dyn MetricsSink>,
    session: WorkerSession,
    metrics: SessionMetrics,
    cancel: CancellationToken,
}

impl Relay {
    async fn run(
        mut self,
        mut upstream: MessageStream,
        tx: mpsc::Sender<Result<TokenFrame, DispatchError>>,
    ) {
        use futures::StreamExt;

        loop {
            match upstream.next().await {
                Some(Ok(WireMessage::Frame(frame))) => {
                    if let Err(err) = self.session.observe_frame(frame.frame_index) {
                        self.fail(&tx, err).await;
                        return;
                    }
                    if self.session.frames_observed() == 1 {
                        let _ = self
                            .registry
                            .transition(self.session.worker_id(), WorkerState::Streaming);
                    }
                    self.metrics.record_frame(frame.encoded_len() as u64);
                    let is_final = frame.is_final;
                    // Suspends when the downstream consumer is slow;
                    // this is the backpressure point.
                    if tx.send(Ok(frame)).await.is_err() {
                        self.abandon();
                        return;
                    }
                    if is_final {
                        self.complete();
                        return;
                    }
                }
                Some(Ok(WireMessage::Error(code))) => {
                    self.fail(&tx, DispatchError::Remote(code)).await;
                    return;
                }
                Some(Ok(WireMessage::Envelope(_))) => {
                    self.fail(
                        &tx,
                        shroud_wire::ProtocolError::Malformed("envelope from worker").into(),
                    )
                    .await;
                    return;
                }
                Some(Err(err)) => {
                    self.fail(&tx, err.into()).await;
                    return;
                }
                // Connection closed without a terminal frame.
                None => {
                    self.fail(&tx, DispatchError::StreamInterrupted).await;
                    return;
                }
            }
        }
    }

    fn complete(&mut self) {
        self.session.complete();
        let _ = self
            .registry
            .transition(self.session.worker_id(), WorkerState::Ready);
        self.sink.emit(self.metrics.finish(SessionOutcome::Completed));
        info!(
            request = %self.session.request_id(),
            worker = %self.session.worker_id(),
            frames = self.session.frames_observed(),
            "session complete"
        );
    }

    async fn fail(&mut self, tx: &mpsc::Sender<Result<TokenFrame, DispatchError>>, err: DispatchError) {
        warn!(
            request = %self.session.request_id(),
            worker = %self.session.worker_id(),
            error = %err,
            frames = self.session.frames_observed(),
            "session failed"
        );
        self.session.fail();
        let _ = self.registry.mark_failed(self.session.worker_id());
        self.sink.emit(self.metrics.finish(SessionOutcome::Failed));
        let _ = tx.send(Err(err)).await;
    }

    /// Downstream consumer went away: cancel the worker exchange and
    /// return the worker to rotation. Partial metrics still go out.
    fn abandon(&mut self) {
        debug!(
            request = %self.session.request_id(),
            worker = %self.session.worker_id(),
            "downstream gone, abandoning session"
        );
        self.cancel.cancel();
        self.session.fail();
        let _ = self.registry.release(self.session.worker_id());
        self.sink.emit(self.metrics.finish(SessionOutcome::Failed));
    }
}

/// Encode a relayed frame stream into the raw byte stream handed to the
/// gateway: the concatenation of encoded frames, still encrypted, with
/// any failure collapsed into one content-free error message.
pub fn into_byte_stream(
    frames: impl Stream<Item = Result<TokenFrame, DispatchError>> + Send + 'static,
) -> impl Stream<Item = Bytes> + Send {
    async_stream::stream! {
        let mut codec = FrameCodec::default();
        let mut buf = bytes::BytesMut::new();
        for await item in frames {
            let msg = match item {
                Ok(frame) => WireMessage::Frame(frame),
                Err(err) => WireMessage::Error(err.error_code()),
            };
            let terminal = !matches!(&msg, WireMessage::Frame(f) if !f.is_final);
            if codec.encode(msg, &mut buf).is_ok() {
                yield buf.split().freeze();
            }
            if terminal {
                return;
            }
        }
    }
}
