//! Guarded lifecycle state holder for one worker process.
//!
//! Wraps [`WorkerState`] behind a mutex so every observed state is the
//! result of a legal transition. Illegal requests are rejected without
//! mutating, and every accepted transition is logged with structured
//! fields.

use parking_lot::Mutex;
use shroud_core::state::{IllegalTransition, WorkerState};
use tracing::info;

/// Thread-safe lifecycle state with transition legality enforced.
#[derive(Debug)]
pub struct LifecycleState {
    current: Mutex<WorkerState>,
}

impl LifecycleState {
    /// New worker, engine not yet loaded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Mutex::new(WorkerState::ModelLoading),
        }
    }

    /// The state right now. Advisory only: it may change the moment the
    /// lock is released.
    #[must_use]
    pub fn current(&self) -> WorkerState {
        *self.current.lock()
    }

    /// Move to `next` if the edge is legal, else leave the state
    /// untouched and report the rejected edge.
    pub fn transition(&self, next: WorkerState) -> Result<(), IllegalTransition> {
        let mut current = self.current.lock();
        if !current.can_transition_to(next) {
            return Err(IllegalTransition {
                from: *current,
                to: next,
            });
        }
        info!(from = %current, to = %next, "worker state transition");
        *current = next;
        Ok(())
    }

    /// Transition into `Failed` from whatever in-flight state the worker
    /// holds. From `Ready` there is nothing in flight to fail, so the
    /// call is a no-op; from `Failed` it is already there.
    pub fn fail(&self) {
        let mut current = self.current.lock();
        if current.can_transition_to(WorkerState::Failed) {
            info!(from = %current, "worker state transition to failed");
            *current = WorkerState::Failed;
        }
    }

    /// Abandon the in-flight request and return to `Ready`.
    ///
    /// Used when the client disconnects before the stream completes.
    /// This is an atomic state replace, not a lifecycle transition: the
    /// worker discards whatever was in flight and re-announces itself as
    /// idle. No-op unless the worker holds an in-flight request.
    pub fn release(&self) {
        let mut current = self.current.lock();
        if matches!(*current, WorkerState::Busy | WorkerState::Streaming) {
            info!(from = %current, "worker released in-flight request");
            *current = WorkerState::Ready;
        }
    }

    /// Claim the single in-flight slot: `Ready -> Busy`, atomically.
    /// Returns the state actually observed when the slot was taken.
    pub fn try_claim(&self) -> Result<(), WorkerState> {
        let mut current = self.current.lock();
        if *current == WorkerState::Ready {
            info!(from = %current, to = %WorkerState::Busy, "worker state transition");
            *current = WorkerState::Busy;
            Ok(())
        } else {
            Err(*current)
        }
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}
