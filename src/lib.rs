//! Asynchronous compute-job orchestration for an image annotation platform.
//!
//! Expensive computations (auto-annotation inference, per-region feature
//! encoding, 2-D projection of embeddings) are triggered from synchronous
//! HTTP requests, executed by worker processes against a Redis-backed
//! queue, and observed by polling clients. This crate is the orchestration
//! shell: dedup of submissions, progress/status reporting, batched result
//! flushing, TTL-cached projection results, and failure cleanup.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
