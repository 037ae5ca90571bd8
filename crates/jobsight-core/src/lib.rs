//! # JobSight Core
//!
//! Shared, WASM-safe logic for JobSight: job models, the PMS text
//! classifier, the local status cache, the status resolution policy, and
//! the remote store trait.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O. It
//! compiles to both native targets and `wasm32-unknown-unknown`.

pub mod cache;
pub mod classifier;
pub mod models;
pub mod remote;
pub mod resolution;
