//! # shroud-core
//!
//! Foundation types for the shroud confidential inference relay.
//!
//! This crate provides the shared vocabulary that all other shroud crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::RequestId`], [`ids::WorkerId`] as newtypes
//! - **Requests**: [`request::TenantRequest`] accepted at the gateway boundary
//! - **Worker states**: [`state::WorkerState`] with the legality table for
//!   lifecycle transitions
//! - **Configuration**: [`config::ShroudConfig`] with `SHROUD_` env overrides
//! - **Logging**: [`logging::init`] tracing setup (metadata-only policy)
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other shroud crates.

#![deny(unsafe_code)]

pub mod config;
pub mod ids;
pub mod logging;
pub mod request;
pub mod state;
