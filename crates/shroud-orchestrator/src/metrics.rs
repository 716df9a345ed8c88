//! Content-free session metrics.
//!
//! One [`MetricsRecord`] is emitted per session, on completion and on
//! failure alike (failure records are partial: whatever counters were
//! accumulated). Records carry correlation IDs, counters, and timings;
//! never prompts, chunks, keys, or any payload-derived value.
//!
//! Records flow to a pluggable [`MetricsSink`]; the production sink logs
//! them and feeds the `metrics` facade, the in-memory sink backs tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use serde::Serialize;
use shroud_core::ids::{RequestId, WorkerId};
use tracing::info;

/// Counter: sessions finished, labeled by outcome.
pub const SESSIONS_TOTAL: &str = "shroud_sessions_total";
/// Histogram: accept-to-first-frame latency.
pub const SESSION_TTFT_MS: &str = "shroud_session_ttft_ms";
/// Histogram: accept-to-terminal latency.
pub const SESSION_TOTAL_MS: &str = "shroud_session_total_ms";
/// Counter: frames relayed downstream.
pub const FRAMES_RELAYED: &str = "shroud_frames_relayed_total";
/// Counter: encrypted bytes relayed downstream.
pub const BYTES_RELAYED: &str = "shroud_bytes_relayed_total";

/// Terminal disposition of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Terminal frame relayed downstream.
    Completed,
    /// Any failure or abandonment path.
    Failed,
}

impl SessionOutcome {
    /// Static label value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Failed => "failed",
        }
    }
}

/// The per-session record. Append-only, emitted exactly once.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsRecord {
    /// Correlation ID.
    pub request_id: RequestId,
    /// Bound worker; `None` when the session failed before selection.
    pub worker_id: Option<WorkerId>,
    /// Terminal disposition.
    pub outcome: SessionOutcome,
    /// Accept-to-first-frame latency; `None` if no frame was observed.
    pub ttft_ms: Option<u64>,
    /// Accept-to-terminal latency.
    pub total_ms: u64,
    /// Whitespace-token estimate of the prompt, counted before sealing.
    pub input_tokens: u64,
    /// Relayed token chunks (one per frame).
    pub output_tokens: u64,
    /// Frames relayed downstream.
    pub frames: u64,
    /// Encrypted bytes relayed downstream.
    pub bytes: u64,
    /// Emission timestamp.
    pub emitted_at: DateTime<Utc>,
}

/// Destination for finished records.
pub trait MetricsSink: Send + Sync {
    /// Accept one finished record.
    fn emit(&self, record: MetricsRecord);
}

/// Production sink: structured log line plus `metrics` facade updates.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn emit(&self, record: MetricsRecord) {
        metrics::counter!(SESSIONS_TOTAL, "outcome" => record.outcome.as_str()).increment(1);
        metrics::counter!(FRAMES_RELAYED).increment(record.frames);
        metrics::counter!(BYTES_RELAYED).increment(record.bytes);
        metrics::histogram!(SESSION_TOTAL_MS).record(record.total_ms as f64);
        if let Some(ttft) = record.ttft_ms {
            metrics::histogram!(SESSION_TTFT_MS).record(ttft as f64);
        }
        info!(
            target: "shroud::metrics",
            request = %record.request_id,
            worker = record.worker_id.as_ref().map(WorkerId::as_str),
            outcome = record.outcome.as_str(),
            ttft_ms = record.ttft_ms,
            total_ms = record.total_ms,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            frames = record.frames,
            bytes = record.bytes,
            "session record"
        );
    }
}

/// Test sink collecting records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<MetricsRecord>>,
}

impl MemorySink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    #[must_use]
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&self, record: MetricsRecord) {
        self.records.lock().push(record);
    }
}

/// Concurrent-safe accumulator for one in-flight session.
///
/// Counter updates happen on the relay path while the record is finished
/// from the same task or a supervisor, hence atomics rather than `&mut`.
pub struct SessionMetrics {
    request_id: RequestId,
    worker_id: Option<WorkerId>,
    input_tokens: u64,
    accepted_at: Instant,
    first_frame_at: Mutex<Option<Instant>>,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl SessionMetrics {
    /// Start accumulating at request-accept time.
    #[must_use]
    pub fn new(request_id: RequestId, worker_id: Option<WorkerId>, input_tokens: u64) -> Self {
        Self {
            request_id,
            worker_id,
            input_tokens,
            accepted_at: Instant::now(),
            first_frame_at: Mutex::new(None),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Count one relayed frame of `encoded_bytes`.
    pub fn record_frame(&self, encoded_bytes: u64) {
        let mut first = self.first_frame_at.lock();
        if first.is_none() {
            *first = Some(Instant::now());
        }
        drop(first);
        let _ = self.frames.fetch_add(1, Ordering::Relaxed);
        let _ = self.bytes.fetch_add(encoded_bytes, Ordering::Relaxed);
    }

    /// Frames counted so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Close the accumulator into its record. Partial counters are kept
    /// as-is on the failure path.
    #[must_use]
    pub fn finish(&self, outcome: SessionOutcome) -> MetricsRecord {
        let frames = self.frames.load(Ordering::Relaxed);
        MetricsRecord {
            request_id: self.request_id.clone(),
            worker_id: self.worker_id.clone(),
            outcome,
            ttft_ms: (*self.first_frame_at.lock())
                .map(|t| (t - self.accepted_at).as_millis() as u64),
            total_ms: self.accepted_at.elapsed().as_millis() as u64,
            input_tokens: self.input_tokens,
            output_tokens: frames,
            frames,
            bytes: self.bytes.load(Ordering::Relaxed),
            emitted_at: Utc::now(),
        }
    }
}

/// Install the process-wide Prometheus recorder behind the `metrics`
/// facade. Call once at orchestrator startup.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_record_counts_frames_and_bytes() {
        let m = SessionMetrics::new(RequestId::assign(), Some(WorkerId::new("w0")), 2);
        m.record_frame(100);
        m.record_frame(50);
        m.record_frame(25);
        let record = m.finish(SessionOutcome::Completed);
        assert_eq!(record.frames, 3);
        assert_eq!(record.output_tokens, 3);
        assert_eq!(record.bytes, 175);
        assert_eq!(record.input_tokens, 2);
        assert!(record.ttft_ms.is_some());
        assert!(record.ttft_ms.unwrap() <= record.total_ms);
    }

    #[test]
    fn failure_before_any_frame_is_partial() {
        let m = SessionMetrics::new(RequestId::assign(), None, 0);
        let record = m.finish(SessionOutcome::Failed);
        assert_eq!(record.frames, 0);
        assert_eq!(record.bytes, 0);
        assert_eq!(record.ttft_ms, None);
        assert_eq!(record.worker_id, None);
    }

    #[test]
    fn memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        for _ in 0..3 {
            let m = SessionMetrics::new(RequestId::assign(), None, 0);
            sink.emit(m.finish(SessionOutcome::Failed));
        }
        assert_eq!(sink.records().len(), 3);
    }

    #[test]
    fn record_serializes_without_content_fields() {
        let m = SessionMetrics::new(RequestId::assign(), Some(WorkerId::new("w0")), 1);
        m.record_frame(10);
        let json = serde_json::to_value(m.finish(SessionOutcome::Completed)).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        // Metadata only; nothing payload-shaped.
        for key in ["request_id", "worker_id", "outcome", "ttft_ms", "total_ms", "frames", "bytes"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert!(!keys.contains(&"prompt"));
        assert!(!keys.contains(&"ciphertext"));
    }
}
