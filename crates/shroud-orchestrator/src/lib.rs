//! # shroud-orchestrator
//!
//! Orchestrator-side half of the encrypted dispatch protocol.
//!
//! The orchestrator never sees plaintext: it seals prompts for a chosen
//! worker, relays the worker's sealed frames downstream unmodified, and
//! records only metadata.
//!
//! - [`registry`]: [`registry::WorkerRegistry`]: worker descriptors,
//!   guarded lifecycle transitions, round-robin selection.
//! - [`session`]: [`session::WorkerSession`]: per-request binding of
//!   worker, ephemeral key, frame-order discipline, and timing.
//! - [`dispatcher`]: [`dispatcher::Dispatcher`]: `submit` a tenant
//!   request, get back a bounded stream of still-encrypted frames.
//! - [`connector`]: transport seam between dispatcher and workers, with
//!   the framed-TCP implementation.
//! - [`metrics`]: content-free per-session records and their sinks.

#![deny(unsafe_code)]

pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod session;

pub use connector::{TcpConnector, WorkerConnector};
pub use dispatcher::{Dispatcher, Submission};
pub use error::DispatchError;
pub use metrics::{MemorySink, MetricsRecord, MetricsSink, SessionOutcome, TracingSink};
pub use registry::{RegistryError, WorkerDescriptor, WorkerRegistry};
pub use session::{SessionStatus, WorkerSession};
