//! Branded identifier newtypes.
//!
//! IDs are plain strings on the wire but distinct types in code, so a
//! request ID can never be passed where a worker ID is expected. Request
//! IDs are assigned by the dispatcher at submission time and are never
//! derived from request content; they exist only to correlate logs and
//! metrics across gateway, orchestrator, and worker.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-unique identifier for one inference request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Assign a fresh request ID (UUIDv7, time-ordered).
    #[must_use]
    pub fn assign() -> Self {
        Self(Uuid::now_v7())
    }

    /// The raw 16-byte form, used in the wire envelope header.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuild a request ID from its wire form.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable identifier for one worker process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a worker ID from the identity announced at bootstrap.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The worker ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
