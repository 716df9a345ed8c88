//! Worker lifecycle states and the transition legality table.
//!
//! ```text
//! ModelLoading ──► Ready ──► Busy ──► Streaming ──► Ready (loop)
//!      │                      │           │
//!      └──────────────────────┴───────────┴──► Failed (terminal)
//! ```
//!
//! `Failed` is terminal for dispatch purposes: leaving it requires the
//! worker to re-announce itself through the registry, which is an atomic
//! state replace rather than a transition here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Capacity state of one worker process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Generation engine is initializing; not yet dispatchable.
    ModelLoading,
    /// Idle and eligible for dispatch.
    Ready,
    /// Holds one in-flight envelope, not yet streaming.
    Busy,
    /// Actively streaming frames for the in-flight request.
    Streaming,
    /// Unrecoverable failure; excluded from dispatch.
    Failed,
}

impl WorkerState {
    /// Whether moving to `next` is a legal lifecycle transition.
    #[must_use]
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::{Busy, Failed, ModelLoading, Ready, Streaming};
        matches!(
            (self, next),
            (ModelLoading, Ready)
                | (Ready, Busy)
                | (Busy, Streaming)
                | (Streaming, Ready)
                | (ModelLoading | Busy | Streaming, Failed)
        )
    }

    /// Whether a worker in this state may receive a new envelope.
    #[must_use]
    pub fn is_dispatchable(self) -> bool {
        self == WorkerState::Ready
    }

    /// Static name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::ModelLoading => "model_loading",
            WorkerState::Ready => "ready",
            WorkerState::Busy => "busy",
            WorkerState::Streaming => "streaming",
            WorkerState::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a lifecycle transition is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal worker transition {from} -> {to}")]
pub struct IllegalTransition {
    /// State the worker was in.
    pub from: WorkerState,
    /// State that was requested.
    pub to: WorkerState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerState::{Busy, Failed, ModelLoading, Ready, Streaming};

    const ALL: [WorkerState; 5] = [ModelLoading, Ready, Busy, Streaming, Failed];

    #[test]
    fn success_loop_is_legal() {
        assert!(ModelLoading.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Ready));
    }

    #[test]
    fn failure_edges() {
        assert!(ModelLoading.can_transition_to(Failed));
        assert!(Busy.can_transition_to(Failed));
        assert!(Streaming.can_transition_to(Failed));
        // An idle worker has nothing in flight to fail.
        assert!(!Ready.can_transition_to(Failed));
    }

    #[test]
    fn loading_cannot_skip_to_busy() {
        assert!(!ModelLoading.can_transition_to(Busy));
        assert!(!ModelLoading.can_transition_to(Streaming));
    }

    #[test]
    fn failed_is_terminal() {
        for next in ALL {
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn only_ready_is_dispatchable() {
        for state in ALL {
            assert_eq!(state.is_dispatchable(), state == Ready);
        }
    }

    #[test]
    fn exact_legal_edge_count() {
        let legal: usize = ALL
            .iter()
            .flat_map(|&a| ALL.iter().map(move |&b| (a, b)))
            .filter(|&(a, b)| a.can_transition_to(b))
            .count();
        // Four success-loop edges plus three failure edges.
        assert_eq!(legal, 7);
    }
}
