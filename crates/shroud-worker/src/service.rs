//! The inference service: one envelope in, a stream of sealed frames out.
//!
//! This is the only place worker-side plaintext exists. The prompt is
//! decrypted here, fed to the engine, and every produced chunk is sealed
//! before it crosses the service boundary. Logs carry request metadata
//! only.
//!
//! Frame discipline: chunks are buffered one deep so the terminal chunk
//! goes out with `is_final` set on a content-bearing frame rather than a
//! trailing empty marker. A generation that produces no chunks still
//! emits exactly one (empty) final frame so the peer always observes a
//! terminal frame on success.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use shroud_core::config::ShroudConfig;
use shroud_core::ids::WorkerId;
use shroud_core::state::WorkerState;
use shroud_crypto::{FrameSealer, WorkerKeyPair, WorkerPublicKey};
use shroud_wire::{EncryptedEnvelope, ErrorCode, TokenFrame, WireMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineLoader, GenerationEngine};
use crate::error::WorkerError;
use crate::state::LifecycleState;

/// Counter: envelopes accepted for inference.
const REQUESTS_ACCEPTED: &str = "shroud_worker_requests_accepted_total";
/// Counter: envelopes rejected (busy, not ready).
const REQUESTS_REJECTED: &str = "shroud_worker_requests_rejected_total";
/// Counter: sealed frames produced.
const FRAMES_SEALED: &str = "shroud_worker_frames_sealed_total";

/// Output stream of one inference call.
pub type InferenceStream = std::pin::Pin<Box<dyn Stream<Item = WireMessage> + Send>>;

/// One worker's inference service.
///
/// Owns the keypair, the lifecycle state, and the generation engine.
/// The keypair exists before the worker ever reports `Ready`, so a
/// dispatchable worker always has an unwrap key.
pub struct WorkerService {
    worker_id: WorkerId,
    keypair: WorkerKeyPair,
    engine: Arc<dyn GenerationEngine>,
    state: LifecycleState,
}

impl WorkerService {
    /// Bring up a worker from configuration: generate the keypair, load
    /// the model, and transition to `Ready`.
    ///
    /// A load failure leaves the worker `Failed` and is returned to the
    /// caller; the worker never becomes dispatchable.
    pub async fn initialize(
        config: &ShroudConfig,
        worker_id: WorkerId,
    ) -> Result<Arc<Self>, WorkerError> {
        let keypair = WorkerKeyPair::generate()?;
        let state = LifecycleState::new();

        let engine = match EngineLoader::new(config.engine.clone()).load().await {
            Ok(engine) => engine,
            Err(err) => {
                warn!(worker = %worker_id, error = %err, "model load failed");
                state.fail();
                return Err(err);
            }
        };

        // ModelLoading -> Ready is always legal here.
        let _ = state.transition(WorkerState::Ready);
        info!(worker = %worker_id, "worker ready");
        Ok(Arc::new(Self {
            worker_id,
            keypair,
            engine: Arc::new(engine),
            state,
        }))
    }

    /// Bring up a worker around an already-constructed engine. The
    /// worker is `Ready` on return.
    pub fn with_engine(
        worker_id: WorkerId,
        engine: Arc<dyn GenerationEngine>,
    ) -> Result<Arc<Self>, WorkerError> {
        let keypair = WorkerKeyPair::generate()?;
        let state = LifecycleState::new();
        let _ = state.transition(WorkerState::Ready);
        Ok(Arc::new(Self {
            worker_id,
            keypair,
            engine,
            state,
        }))
    }

    /// This worker's ID.
    #[must_use]
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// The public key clients seal envelopes against.
    #[must_use]
    pub fn public_key(&self) -> WorkerPublicKey {
        self.keypair.public_key()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state.current()
    }

    /// Run one inference session.
    ///
    /// Yields sealed [`WireMessage::Frame`]s in counter order, ending
    /// with either a frame whose `is_final` flag is set or a terminal
    /// [`WireMessage::Error`]. If the worker is not `Ready` the stream
    /// yields a single error and the worker is untouched. Cancelling
    /// `cancel` abandons generation and returns the worker to `Ready`.
    pub fn run_inference(
        self: Arc<Self>,
        envelope: EncryptedEnvelope,
        cancel: CancellationToken,
    ) -> InferenceStream {
        let service = self;
        Box::pin(async_stream::stream! {
            if let Err(observed) = service.state.try_claim() {
                let code = match observed {
                    WorkerState::Busy | WorkerState::Streaming => ErrorCode::Busy,
                    _ => ErrorCode::Unavailable,
                };
                metrics::counter!(REQUESTS_REJECTED).increment(1);
                debug!(
                    worker = %service.worker_id,
                    request = %envelope.request_id,
                    state = %observed,
                    "envelope rejected"
                );
                yield WireMessage::Error(code);
                return;
            }
            metrics::counter!(REQUESTS_ACCEPTED).increment(1);

            // Worker is Busy from here on; every exit path must move it
            // to Ready, Failed, or release it.
            let (session_key, prompt) =
                match shroud_crypto::open(&envelope.crypto_envelope(), &service.keypair) {
                    Ok(opened) => opened,
                    Err(err) => {
                        // A forged or corrupted envelope reached the
                        // enclave boundary; treat the channel as hostile.
                        warn!(
                            worker = %service.worker_id,
                            request = %envelope.request_id,
                            error = %err,
                            "envelope failed to open"
                        );
                        service.state.fail();
                        yield WireMessage::Error(ErrorCode::CryptoFailure);
                        return;
                    }
                };
            let prompt = String::from_utf8_lossy(&prompt).into_owned();
            info!(
                worker = %service.worker_id,
                request = %envelope.request_id,
                prompt_bytes = prompt.len(),
                "envelope accepted"
            );

            let mut sealer = FrameSealer::new(&session_key);
            let mut chunks = service.engine.generate(&prompt);
            // Busy -> Streaming once generation starts.
            let _ = service.state.transition(WorkerState::Streaming);

            // One-deep buffer so the last content chunk carries is_final.
            let mut pending: Option<String> = None;
            loop {
                let item = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(
                            worker = %service.worker_id,
                            request = %envelope.request_id,
                            "inference cancelled"
                        );
                        service.state.release();
                        return;
                    }
                    item = chunks.next() => item,
                };
                match item {
                    Some(Ok(chunk)) => {
                        if let Some(prev) = pending.replace(chunk) {
                            match sealer.seal_chunk(prev.as_bytes()) {
                                Ok(sealed) => {
                                    metrics::counter!(FRAMES_SEALED).increment(1);
                                    yield WireMessage::Frame(TokenFrame::from_sealed(sealed, false));
                                }
                                Err(err) => {
                                    warn!(
                                        worker = %service.worker_id,
                                        request = %envelope.request_id,
                                        error = %err,
                                        "frame seal failed"
                                    );
                                    service.state.fail();
                                    yield WireMessage::Error(ErrorCode::CryptoFailure);
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(
                            worker = %service.worker_id,
                            request = %envelope.request_id,
                            error = %err,
                            "engine failed mid-stream"
                        );
                        // The chunk produced before the failure still
                        // goes out; the error terminates the stream.
                        if let Some(prev) = pending.take() {
                            if let Ok(sealed) = sealer.seal_chunk(prev.as_bytes()) {
                                metrics::counter!(FRAMES_SEALED).increment(1);
                                yield WireMessage::Frame(TokenFrame::from_sealed(sealed, false));
                            }
                        }
                        service.state.fail();
                        yield WireMessage::Error(ErrorCode::EngineFailure);
                        return;
                    }
                    None => {
                        let last = pending.take().unwrap_or_default();
                        match sealer.seal_chunk(last.as_bytes()) {
                            Ok(sealed) => {
                                metrics::counter!(FRAMES_SEALED).increment(1);
                                let frames = sealed.counter + 1;
                                yield WireMessage::Frame(TokenFrame::from_sealed(sealed, true));
                                let _ = service.state.transition(WorkerState::Ready);
                                info!(
                                    worker = %service.worker_id,
                                    request = %envelope.request_id,
                                    frames,
                                    "inference complete"
                                );
                            }
                            Err(err) => {
                                warn!(
                                    worker = %service.worker_id,
                                    request = %envelope.request_id,
                                    error = %err,
                                    "frame seal failed"
                                );
                                service.state.fail();
                                yield WireMessage::Error(ErrorCode::CryptoFailure);
                            }
                        }
                        return;
                    }
                }
            }
        })
    }
}
