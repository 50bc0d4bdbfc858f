//! Cross-shard global account rename service.
//!
//! # Purpose
//! Exposes the claim store, validator, orchestrator, per-shard job family,
//! approval queue and HTTP API for use by the binary and tests.
//!
//! # Notes
//! A rename is claimed once, then walked shard by shard by chained jobs. Each
//! job reads its own status row under a lock before touching the shard, so
//! duplicate deliveries and resumed chains are safe.
pub mod api;
pub mod app;
pub mod approval;
pub mod config;
pub mod jobs;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod recovery;
pub mod registry;
pub mod shard;
pub mod store;
pub mod validator;
