//! # shroud-worker
//!
//! Worker-side half of the encrypted dispatch protocol.
//!
//! A worker process owns one generation capability (one accelerator, one
//! in-flight request) and never lets plaintext leave its boundary:
//!
//! - [`engine`]: the opaque generation capability seam:
//!   [`engine::GenerationEngine`] produces a lazy, finite,
//!   non-restartable chunk sequence; [`engine::EngineLoader`] validates
//!   engine configuration and simulates model load.
//! - [`state`]: guarded lifecycle state machine
//!   (`ModelLoading → Ready → Busy → Streaming → Ready`, failures
//!   terminal).
//! - [`service`]: [`service::WorkerService`]: decrypts one envelope,
//!   streams encrypted token frames back, enforces single in-flight.
//! - [`server`]: framed TCP listener exposing
//!   `RunInference(envelope) -> stream(frame)` over `shroud-wire`.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod server;
pub mod service;
pub mod state;

pub use engine::{EngineLoader, GenerationEngine, SimulatedEngine};
pub use error::WorkerError;
pub use service::WorkerService;
