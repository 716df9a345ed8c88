//! Worker descriptors and the registry that owns them.
//!
//! The registry is the single shared mutable structure on the
//! orchestrator side. Descriptors are mutated only through guarded
//! transition operations here; selection and transition share one lock,
//! so a worker can never be handed to two sessions at once.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shroud_core::ids::WorkerId;
use shroud_core::state::{IllegalTransition, WorkerState};
use shroud_crypto::WorkerPublicKey;
use tracing::{info, warn};

/// Gauge: workers currently in `Ready`.
const READY_WORKERS: &str = "shroud_registry_ready_workers";

/// Identity, endpoint, key, and lifecycle state of one worker process.
#[derive(Clone, Debug)]
pub struct WorkerDescriptor {
    /// Identity announced at bootstrap.
    pub worker_id: WorkerId,
    /// Network endpoint the connector dials.
    pub endpoint: String,
    /// Public key envelopes are sealed against.
    pub public_key: WorkerPublicKey,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Last readiness refresh.
    pub last_heartbeat: DateTime<Utc>,
}

/// Registry operation failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No worker is currently `Ready`.
    #[error("no ready worker available")]
    NoWorkerAvailable,

    /// The worker ID is not registered.
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),

    /// The worker ID is already registered.
    #[error("worker {0} already registered")]
    DuplicateWorker(WorkerId),

    /// The requested lifecycle transition is not legal.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}

struct RegistryInner {
    // Insertion order is the round-robin tie-break order.
    workers: Vec<WorkerDescriptor>,
    cursor: usize,
}

/// Orchestrator-owned table of workers.
pub struct WorkerRegistry {
    inner: Mutex<RegistryInner>,
}

impl WorkerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                workers: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Register a worker announced at bootstrap. The descriptor starts
    /// in `ModelLoading`; it becomes dispatchable via [`Self::mark_ready`]
    /// once the worker reports its engine is up.
    pub fn register(
        &self,
        worker_id: WorkerId,
        endpoint: impl Into<String>,
        public_key: WorkerPublicKey,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.workers.iter().any(|w| w.worker_id == worker_id) {
            return Err(RegistryError::DuplicateWorker(worker_id));
        }
        info!(worker = %worker_id, "worker registered");
        inner.workers.push(WorkerDescriptor {
            worker_id,
            endpoint: endpoint.into(),
            public_key,
            state: WorkerState::ModelLoading,
            last_heartbeat: Utc::now(),
        });
        Ok(())
    }

    /// Select the next `Ready` worker round-robin and atomically mark it
    /// `Busy`. The returned descriptor snapshot is the session's worker
    /// for its entire lifetime.
    pub fn select_worker(&self) -> Result<WorkerDescriptor, RegistryError> {
        let mut inner = self.inner.lock();
        let len = inner.workers.len();
        if len == 0 {
            return Err(RegistryError::NoWorkerAvailable);
        }
        let start = inner.cursor;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if inner.workers[idx].state.is_dispatchable() {
                inner.workers[idx].state = WorkerState::Busy;
                inner.cursor = (idx + 1) % len;
                let chosen = inner.workers[idx].clone();
                info!(worker = %chosen.worker_id, "worker selected");
                self.update_ready_gauge(&inner);
                return Ok(chosen);
            }
        }
        Err(RegistryError::NoWorkerAvailable)
    }

    /// Apply a legal lifecycle transition to one descriptor.
    pub fn transition(
        &self,
        worker_id: &WorkerId,
        next: WorkerState,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let worker = find_mut(&mut inner.workers, worker_id)?;
        if !worker.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: worker.state,
                to: next,
            }
            .into());
        }
        info!(worker = %worker_id, from = %worker.state, to = %next, "registry transition");
        worker.state = next;
        self.update_ready_gauge(&inner);
        Ok(())
    }

    /// Mark a worker `Failed` from whatever in-flight state it holds and
    /// exclude it from future selection. No-op from `Ready` (nothing in
    /// flight) and from `Failed`.
    pub fn mark_failed(&self, worker_id: &WorkerId) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let worker = find_mut(&mut inner.workers, worker_id)?;
        if worker.state.can_transition_to(WorkerState::Failed) {
            warn!(worker = %worker_id, from = %worker.state, "worker marked failed");
            worker.state = WorkerState::Failed;
        }
        self.update_ready_gauge(&inner);
        Ok(())
    }

    /// Readiness (re-)announcement: atomic state replace to `Ready`,
    /// refreshing the heartbeat timestamp. This is how a restarted
    /// worker re-enters rotation after `Failed`.
    pub fn mark_ready(&self, worker_id: &WorkerId) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let worker = find_mut(&mut inner.workers, worker_id)?;
        if worker.state != WorkerState::Ready {
            info!(worker = %worker_id, from = %worker.state, "worker announced ready");
        }
        worker.state = WorkerState::Ready;
        worker.last_heartbeat = Utc::now();
        self.update_ready_gauge(&inner);
        Ok(())
    }

    /// Return an in-flight worker to `Ready` after its session was
    /// abandoned (downstream disconnect). Atomic replace, mirroring the
    /// worker's own release on cancellation.
    pub fn release(&self, worker_id: &WorkerId) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let worker = find_mut(&mut inner.workers, worker_id)?;
        if matches!(worker.state, WorkerState::Busy | WorkerState::Streaming) {
            info!(worker = %worker_id, from = %worker.state, "worker released");
            worker.state = WorkerState::Ready;
        }
        self.update_ready_gauge(&inner);
        Ok(())
    }

    /// Refresh a worker's heartbeat timestamp without touching state.
    pub fn heartbeat(&self, worker_id: &WorkerId) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let worker = find_mut(&mut inner.workers, worker_id)?;
        worker.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Current state of one worker.
    pub fn state_of(&self, worker_id: &WorkerId) -> Result<WorkerState, RegistryError> {
        let inner = self.inner.lock();
        inner
            .workers
            .iter()
            .find(|w| &w.worker_id == worker_id)
            .map(|w| w.state)
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.clone()))
    }

    /// Point-in-time copy of every descriptor, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerDescriptor> {
        self.inner.lock().workers.clone()
    }

    fn update_ready_gauge(&self, inner: &RegistryInner) {
        let ready = inner
            .workers
            .iter()
            .filter(|w| w.state == WorkerState::Ready)
            .count();
        metrics::gauge!(READY_WORKERS).set(ready as f64);
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut<'a>(
    workers: &'a mut [WorkerDescriptor],
    worker_id: &WorkerId,
) -> Result<&'a mut WorkerDescriptor, RegistryError> {
    workers
        .iter_mut()
        .find(|w| &w.worker_id == worker_id)
        .ok_or_else(|| RegistryError::UnknownWorker(worker_id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shroud_crypto::WorkerKeyPair;

    fn registry_with(n: usize) -> (WorkerRegistry, Vec<WorkerId>) {
        let registry = WorkerRegistry::new();
        let ids: Vec<WorkerId> = (0..n).map(|i| WorkerId::new(format!("w{i}"))).collect();
        for (i, id) in ids.iter().enumerate() {
            let kp = WorkerKeyPair::generate().unwrap();
            registry
                .register(id.clone(), format!("127.0.0.1:{}", 9000 + i), kp.public_key())
                .unwrap();
            registry.mark_ready(id).unwrap();
        }
        (registry, ids)
    }

    #[test]
    fn duplicate_registration_rejected() {
        let (registry, ids) = registry_with(1);
        let kp = WorkerKeyPair::generate().unwrap();
        assert_matches!(
            registry.register(ids[0].clone(), "x", kp.public_key()),
            Err(RegistryError::DuplicateWorker(_))
        );
    }

    #[test]
    fn registered_worker_is_not_dispatchable_until_ready() {
        let registry = WorkerRegistry::new();
        let kp = WorkerKeyPair::generate().unwrap();
        registry
            .register(WorkerId::new("w0"), "ep", kp.public_key())
            .unwrap();
        assert_matches!(
            registry.select_worker(),
            Err(RegistryError::NoWorkerAvailable)
        );
        registry.mark_ready(&WorkerId::new("w0")).unwrap();
        assert!(registry.select_worker().is_ok());
    }

    #[test]
    fn selection_marks_busy_atomically() {
        let (registry, ids) = registry_with(1);
        let chosen = registry.select_worker().unwrap();
        assert_eq!(chosen.worker_id, ids[0]);
        assert_eq!(chosen.state, WorkerState::Busy);
        assert_eq!(registry.state_of(&ids[0]).unwrap(), WorkerState::Busy);
        assert_matches!(
            registry.select_worker(),
            Err(RegistryError::NoWorkerAvailable)
        );
    }

    #[test]
    fn round_robin_cycles_in_insertion_order() {
        let (registry, ids) = registry_with(3);
        let mut picks = Vec::new();
        for _ in 0..6 {
            let chosen = registry.select_worker().unwrap();
            picks.push(chosen.worker_id.clone());
            // Complete the session so the worker is selectable again.
            registry.transition(&chosen.worker_id, WorkerState::Streaming).unwrap();
            registry.transition(&chosen.worker_id, WorkerState::Ready).unwrap();
        }
        let expected: Vec<WorkerId> = ids.iter().cycle().take(6).cloned().collect();
        assert_eq!(picks, expected);
    }

    #[test]
    fn selection_skips_failed_workers() {
        let (registry, ids) = registry_with(3);
        // Fail w1 mid-flight.
        registry.transition(&ids[1], WorkerState::Busy).unwrap();
        registry.mark_failed(&ids[1]).unwrap();

        let mut picks = Vec::new();
        for _ in 0..4 {
            let chosen = registry.select_worker().unwrap();
            picks.push(chosen.worker_id.clone());
            registry.transition(&chosen.worker_id, WorkerState::Streaming).unwrap();
            registry.transition(&chosen.worker_id, WorkerState::Ready).unwrap();
        }
        assert!(!picks.contains(&ids[1]));
        assert_eq!(picks, vec![ids[0].clone(), ids[2].clone(), ids[0].clone(), ids[2].clone()]);
    }

    #[test]
    fn illegal_transition_rejected_and_state_kept() {
        let (registry, ids) = registry_with(1);
        assert_matches!(
            registry.transition(&ids[0], WorkerState::Streaming),
            Err(RegistryError::IllegalTransition(_))
        );
        assert_eq!(registry.state_of(&ids[0]).unwrap(), WorkerState::Ready);
    }

    #[test]
    fn mark_failed_from_ready_is_noop() {
        let (registry, ids) = registry_with(1);
        registry.mark_failed(&ids[0]).unwrap();
        assert_eq!(registry.state_of(&ids[0]).unwrap(), WorkerState::Ready);
    }

    #[test]
    fn failed_worker_reenters_via_mark_ready() {
        let (registry, ids) = registry_with(1);
        registry.transition(&ids[0], WorkerState::Busy).unwrap();
        registry.mark_failed(&ids[0]).unwrap();
        assert_matches!(
            registry.select_worker(),
            Err(RegistryError::NoWorkerAvailable)
        );
        registry.mark_ready(&ids[0]).unwrap();
        assert_eq!(registry.select_worker().unwrap().worker_id, ids[0]);
    }

    #[test]
    fn release_returns_busy_worker_to_rotation() {
        let (registry, ids) = registry_with(1);
        let _ = registry.select_worker().unwrap();
        registry.release(&ids[0]).unwrap();
        assert_eq!(registry.state_of(&ids[0]).unwrap(), WorkerState::Ready);
    }

    #[test]
    fn unknown_worker_errors() {
        let (registry, _) = registry_with(1);
        let ghost = WorkerId::new("ghost");
        assert_matches!(
            registry.heartbeat(&ghost),
            Err(RegistryError::UnknownWorker(_))
        );
    }

    #[test]
    fn heartbeat_refreshes_timestamp() {
        let (registry, ids) = registry_with(1);
        let before = registry.snapshot()[0].last_heartbeat;
        registry.heartbeat(&ids[0]).unwrap();
        let after = registry.snapshot()[0].last_heartbeat;
        assert!(after >= before);
    }
}
