//! # Jobsight
//!
//! PMS (spot color) detection and status sync for print-shop job pages.
//!
//! A job's text is classified for PMS color requirements, users can
//! override the result, and the status is cached locally and shared with
//! other sessions through a remote store (Supabase).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Classifier │──▶│ StatusService│──▶│ StatusStore │──▶ SQLite
//! └────────────┘   │ (resolution) │   └─────────────┘
//!                  └──────┬───────┘
//!                         │ SyncClient
//!                         ▼
//!                  ┌──────────────┐
//!                  │ RemoteStore  │  Supabase / in-memory
//!                  └──────────────┘
//!        ▲                     ▲
//!   ┌─────────┐          ┌──────────┐
//!   │   CLI   │          │   HTTP   │
//!   └─────────┘          └──────────┘
//! ```
//!
//! The pure parts (classifier, cache, resolution policy, remote trait)
//! live in `jobsight-core`; this crate adds persistence, the Supabase
//! client, sync, and the CLI and HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`cache_db`] | Durable copy of the local cache |
//! | [`supabase`] | PostgREST remote store |
//! | [`sync`] | Best-effort fetch and push |
//! | [`service`] | Status pipeline facade |
//! | [`server`] | HTTP API |

pub mod cache_db;
pub mod config;
pub mod db;
pub mod migrate;
pub mod server;
pub mod service;
pub mod supabase;
pub mod sync;

pub use jobsight_core::{cache, classifier, models, remote, resolution};
