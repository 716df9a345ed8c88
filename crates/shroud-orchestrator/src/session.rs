//! Per-request session state.
//!
//! A session binds one request to one worker and one ephemeral key for
//! its entire lifetime. It also carries the relay's frame-order
//! discipline: the dispatcher verifies index contiguity here without
//! ever decrypting a frame.

use std::time::{Duration, Instant};

use shroud_core::ids::{RequestId, WorkerId};
use shroud_crypto::SessionKey;

use crate::error::DispatchError;

/// Relay-side status of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Envelope sent, no frame observed yet.
    Dispatched,
    /// At least one frame relayed.
    Streaming,
    /// Terminal frame relayed.
    Completed,
    /// Terminal state on any failure or abandonment.
    Failed,
}

impl SessionStatus {
    /// Whether the session has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// One request's binding of worker, key, ordering state, and timing.
///
/// The session key is held for the downstream consumer that eventually
/// decrypts (the tenant boundary); the relay itself never uses it on
/// frame content.
pub struct WorkerSession {
    request_id: RequestId,
    worker_id: WorkerId,
    session_key: SessionKey,
    next_frame_index: u64,
    status: SessionStatus,
    created_at: Instant,
    first_frame_at: Option<Instant>,
    completed_at: Option<Instant>,
}

impl WorkerSession {
    /// Open a session at dispatch time.
    #[must_use]
    pub fn new(request_id: RequestId, worker_id: WorkerId, session_key: SessionKey) -> Self {
        Self {
            request_id,
            worker_id,
            session_key,
            next_frame_index: 0,
            status: SessionStatus::Dispatched,
            created_at: Instant::now(),
            first_frame_at: None,
            completed_at: None,
        }
    }

    /// The request this session serves.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The worker bound at dispatch; never reassigned.
    #[must_use]
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// The ephemeral key for the tenant-side decryption boundary.
    #[must_use]
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Current relay-side status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Record one relayed frame, enforcing contiguous monotonic indices.
    ///
    /// Rejecting here means the bad frame is never forwarded downstream.
    pub fn observe_frame(&mut self, frame_index: u64) -> Result<(), DispatchError> {
        if frame_index != self.next_frame_index {
            return Err(DispatchError::OutOfOrderFrame {
                expected: self.next_frame_index,
                got: frame_index,
            });
        }
        if self.first_frame_at.is_none() {
            self.first_frame_at = Some(Instant::now());
            self.status = SessionStatus::Streaming;
        }
        self.next_frame_index += 1;
        Ok(())
    }

    /// Mark the session delivered-complete.
    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.completed_at = Some(Instant::now());
    }

    /// Mark the session failed.
    pub fn fail(&mut self) {
        self.status = SessionStatus::Failed;
        self.completed_at = Some(Instant::now());
    }

    /// Frames observed so far.
    #[must_use]
    pub fn frames_observed(&self) -> u64 {
        self.next_frame_index
    }

    /// Accept-to-first-frame latency, if a frame was observed.
    #[must_use]
    pub fn ttft(&self) -> Option<Duration> {
        self.first_frame_at.map(|t| t - self.created_at)
    }

    /// Accept-to-terminal latency; up to now if not yet terminal.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.completed_at.unwrap_or_else(Instant::now) - self.created_at
    }
}
