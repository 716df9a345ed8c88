//! End-to-end exercises of dispatch, relay, and worker protocol with
//! real workers behind an in-process connector, plus one pass over the
//! framed TCP transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::StreamExt;
use shroud_core::config::ShroudConfig;
use shroud_core::ids::WorkerId;
use shroud_core::request::TenantRequest;
use shroud_core::state::WorkerState;
use shroud_crypto::FrameOpener;
use shroud_orchestrator::connector::MessageStream;
use shroud_orchestrator::{
    DispatchError, Dispatcher, MemorySink, MetricsSink, SessionOutcome, Submission,
    TcpConnector, WorkerConnector, WorkerRegistry,
};
use shroud_wire::{EncryptedEnvelope, ErrorCode};
use shroud_worker::engine::{ChunkStream, GenerationEngine, ScriptedEngine};
use shroud_worker::server::WorkerServer;
use shroud_worker::WorkerService;
use tokio_util::sync::CancellationToken;

/// Routes "endpoints" straight to in-process worker services.
struct LocalConnector {
    workers: HashMap<String, Arc<WorkerService>>,
}

#[async_trait]
impl WorkerConnector for LocalConnector {
    async fn run_inference(
        &self,
        endpoint: &str,
        envelope: EncryptedEnvelope,
        cancel: CancellationToken,
    ) -> Result<MessageStream, DispatchError> {
        let service = self.workers.get(endpoint).expect("unknown endpoint");
        Ok(Box::pin(Arc::clone(service).run_inference(envelope, cancel).map(Ok)))
    }
}

struct Harness {
    dispatcher: Dispatcher,
    registry: Arc<WorkerRegistry>,
    sink: Arc<MemorySink>,
    services: Vec<Arc<WorkerService>>,
}

fn harness_with(engines: Vec<Arc<dyn GenerationEngine>>, config: &ShroudConfig) -> Harness {
    let registry = Arc::new(WorkerRegistry::new());
    let mut workers = HashMap::new();
    let mut services = Vec::new();
    for (i, engine) in engines.into_iter().enumerate() {
        let id = WorkerId::new(format!("w{i}"));
        let endpoint = format!("local-{i}");
        let service = WorkerService::with_engine(id.clone(), engine).unwrap();
        registry
            .register(id.clone(), endpoint.clone(), service.public_key())
            .unwrap();
        registry.mark_ready(&id).unwrap();
        let _ = workers.insert(endpoint, Arc::clone(&service));
        services.push(service);
    }
    let sink = Arc::new(MemorySink::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(LocalConnector { workers }),
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
        config,
    );
    Harness {
        dispatcher,
        registry,
        sink,
        services,
    }
}

fn harness(engines: Vec<Arc<dyn GenerationEngine>>) -> Harness {
    harness_with(engines, &ShroudConfig::default())
}

/// Collect a submission's stream and decrypt every frame with its
/// session key, returning the decrypted chunks and the final flags.
async fn decrypt_all(submission: Submission) -> (Vec<String>, Vec<bool>) {
    let key = submission.session_key.clone();
    let mut opener = FrameOpener::new(&key);
    let mut chunks = Vec::new();
    let mut finals = Vec::new();
    let mut frames = submission.frames;
    while let Some(item) = frames.next().await {
        let frame = item.expect("relay error");
        finals.push(frame.is_final);
        let plain = opener.open_frame(&frame.sealed_frame()).expect("frame decrypts");
        chunks.push(String::from_utf8(plain).unwrap());
    }
    (chunks, finals)
}

#[tokio::test]
async fn happy_path_streams_decryptable_frames() {
    let h = harness(vec![Arc::new(ScriptedEngine::completing(&[
        "This", " is", " a", " mock", " response.",
    ]))]);
    let submission = h
        .dispatcher
        .submit(TenantRequest::plain("t1", "hello"))
        .await
        .unwrap();
    let worker_id = submission.worker_id.clone();

    let (chunks, finals) = decrypt_all(submission).await;
    let k = chunks.len();
    assert_eq!(k, 5);
    assert_eq!(chunks.concat(), "This is a mock response.");
    // Only the last frame is final.
    assert!(finals[..k - 1].iter().all(|f| !f));
    assert!(finals[k - 1]);

    assert_eq!(h.registry.state_of(&worker_id).unwrap(), WorkerState::Ready);
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, SessionOutcome::Completed);
    assert_eq!(records[0].output_tokens, k as u64);
    assert_eq!(records[0].frames, k as u64);
    assert_eq!(records[0].input_tokens, 1);
    assert!(records[0].ttft_ms.is_some());
}

#[tokio::test]
async fn no_capacity_fails_fast() {
    let h = harness(vec![]);
    let err = h
        .dispatcher
        .submit(TenantRequest::plain("t1", "hello"))
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::WorkerUnavailable);

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, SessionOutcome::Failed);
    assert_eq!(records[0].worker_id, None);
    assert_eq!(records[0].frames, 0);
    assert_eq!(records[0].ttft_ms, None);
}

#[tokio::test]
async fn mid_stream_failure_relays_partial_frames_then_error() {
    let h = harness(vec![Arc::new(ScriptedEngine::failing_after(
        &["a", "b", "c"],
        "accelerator lost",
    ))]);
    let submission = h
        .dispatcher
        .submit(TenantRequest::plain("t1", "hello"))
        .await
        .unwrap();
    let worker_id = submission.worker_id.clone();
    let key = submission.session_key.clone();

    let out: Vec<_> = submission.frames.collect().await;
    assert_eq!(out.len(), 4);
    let mut opener = FrameOpener::new(&key);
    for (item, expected) in out[..3].iter().zip(["a", "b", "c"]) {
        let frame = assert_matches!(item, Ok(f) => f);
        assert!(!frame.is_final);
        assert_eq!(
            opener.open_frame(&frame.sealed_frame()).unwrap(),
            expected.as_bytes()
        );
    }
    assert_matches!(&out[3], Err(DispatchError::Remote(ErrorCode::EngineFailure)));

    assert_eq!(h.registry.state_of(&worker_id).unwrap(), WorkerState::Failed);
    assert_eq!(h.services[0].state(), WorkerState::Failed);
    let records = h.sink.records();
    assert_eq!(records[0].outcome, SessionOutcome::Failed);
    assert_eq!(records[0].frames, 3);
}

#[tokio::test]
async fn concurrent_sessions_stay_independent() {
    let h = harness(vec![
        Arc::new(ScriptedEngine::completing(&["left-0", "left-1", "left-2"])),
        Arc::new(ScriptedEngine::completing(&["right-0", "right-1"])),
    ]);

    let (a, b) = tokio::join!(
        h.dispatcher.submit(TenantRequest::plain("t1", "first")),
        h.dispatcher.submit(TenantRequest::plain("t2", "second")),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_ne!(a.worker_id, b.worker_id);

    let ((a_chunks, a_finals), (b_chunks, b_finals)) =
        tokio::join!(decrypt_all(a), decrypt_all(b));
    // Each session's own frames arrive in order and decrypt under its
    // own key; which worker served which request is not asserted.
    let (left, right) = if a_chunks[0].starts_with("left") {
        ((a_chunks, a_finals), (b_chunks, b_finals))
    } else {
        ((b_chunks, b_finals), (a_chunks, a_finals))
    };
    assert_eq!(left.0, vec!["left-0", "left-1", "left-2"]);
    assert_eq!(right.0, vec!["right-0", "right-1"]);
    assert!(left.1[2] && right.1[1]);

    assert_eq!(h.sink.records().len(), 2);
    for record in h.sink.records() {
        assert_eq!(record.outcome, SessionOutcome::Completed);
    }
}

#[tokio::test]
async fn dispatch_is_round_robin_fair() {
    let w = 3;
    let n = 7;
    let engines: Vec<Arc<dyn GenerationEngine>> = (0..w)
        .map(|_| Arc::new(ScriptedEngine::completing(&["tok"])) as Arc<dyn GenerationEngine>)
        .collect();
    let h = harness(engines);

    let mut counts: HashMap<WorkerId, usize> = HashMap::new();
    for i in 0..n {
        let submission = h
            .dispatcher
            .submit(TenantRequest::plain("t1", format!("req {i}")))
            .await
            .unwrap();
        *counts.entry(submission.worker_id.clone()).or_default() += 1;
        // Drain to completion so the worker returns to rotation.
        let (_, finals) = decrypt_all(submission).await;
        assert!(finals.last().copied().unwrap_or(false));
    }

    assert_eq!(counts.len(), w);
    for count in counts.values() {
        assert!(*count == n / w || *count == n / w + 1, "uneven split: {counts:?}");
    }
}

/// Endless generator that counts how many chunks it has produced.
struct CountingEngine {
    produced: Arc<AtomicUsize>,
}

impl GenerationEngine for CountingEngine {
    fn generate(&self, _prompt: &str) -> ChunkStream {
        let produced = Arc::clone(&self.produced);
        Box::pin(async_stream::stream! {
            loop {
                let n = produced.fetch_add(1, Ordering::SeqCst);
                yield Ok(format!("chunk {n}"));
            }
        })
    }
}

#[tokio::test]
async fn backpressure_bounds_buffered_frames() {
    let produced = Arc::new(AtomicUsize::new(0));
    let config = ShroudConfig {
        relay_buffer: 4,
        ..ShroudConfig::default()
    };
    let h = harness_with(
        vec![Arc::new(CountingEngine {
            produced: Arc::clone(&produced),
        })],
        &config,
    );

    let submission = h
        .dispatcher
        .submit(TenantRequest::plain("t1", "slow consumer"))
        .await
        .unwrap();

    // Never read a single frame; let the pipeline fill up.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let high_water = produced.load(Ordering::SeqCst);
    // Channel capacity plus the frame parked in send plus the worker's
    // one-chunk lookahead.
    assert!(
        high_water <= config.relay_buffer + 3,
        "produced {high_water} chunks against buffer {}",
        config.relay_buffer
    );

    // Dropping the consumer cancels the session and frees the worker.
    drop(submission.frames);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.services[0].state(), WorkerState::Ready);
    assert_eq!(
        h.registry.state_of(&submission.worker_id).unwrap(),
        WorkerState::Ready
    );
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, SessionOutcome::Failed);
}

#[tokio::test]
async fn downstream_disconnect_returns_worker_to_rotation() {
    let produced = Arc::new(AtomicUsize::new(0));
    let h = harness(vec![Arc::new(CountingEngine { produced })]);

    let mut submission = h
        .dispatcher
        .submit(TenantRequest::plain("t1", "abandoned"))
        .await
        .unwrap();
    // Take a couple of frames, then walk away.
    let first = submission.frames.next().await.unwrap().unwrap();
    assert_eq!(first.frame_index, 0);
    let second = submission.frames.next().await.unwrap().unwrap();
    assert_eq!(second.frame_index, 1);
    drop(submission.frames);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.services[0].state(), WorkerState::Ready);
    assert_eq!(
        h.registry.state_of(&submission.worker_id).unwrap(),
        WorkerState::Ready
    );

    // The worker accepts fresh work after abandonment.
    let next = h
        .dispatcher
        .submit(TenantRequest::plain("t1", "fresh"))
        .await
        .unwrap();
    let mut frames = next.frames;
    let frame = frames.next().await.unwrap().unwrap();
    assert_eq!(frame.frame_index, 0);
}

#[tokio::test]
async fn tcp_transport_end_to_end() {
    let service = WorkerService::with_engine(
        WorkerId::new("tcp-w0"),
        Arc::new(ScriptedEngine::completing(&["over", " tcp"])),
    )
    .unwrap();
    let listener = WorkerServer::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = Arc::new(WorkerServer::new(Arc::clone(&service), 256 * 1024));
    let _ = tokio::spawn(Arc::clone(&server).serve(listener, shutdown.clone()));

    let registry = Arc::new(WorkerRegistry::new());
    registry
        .register(WorkerId::new("tcp-w0"), addr.to_string(), service.public_key())
        .unwrap();
    registry.mark_ready(&WorkerId::new("tcp-w0")).unwrap();
    let sink = Arc::new(MemorySink::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(TcpConnector::new(256 * 1024)),
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
        &ShroudConfig::default(),
    );

    let submission = dispatcher
        .submit(TenantRequest::plain("t1", "hello over the wire"))
        .await
        .unwrap();
    let (chunks, finals) = decrypt_all(submission).await;
    assert_eq!(chunks.concat(), "over tcp");
    assert!(finals.last().copied().unwrap());

    assert_eq!(
        registry.state_of(&WorkerId::new("tcp-w0")).unwrap(),
        WorkerState::Ready
    );
    assert_eq!(sink.records()[0].outcome, SessionOutcome::Completed);
    shutdown.cancel();
}
