//! Sync client between the local cache and the remote store.
//!
//! The remote side is always best-effort:
//!
//! - [`SyncClient::fetch_remote`] never fails. Transport errors are logged
//!   as warnings and reported as "not found", so callers fall back to the
//!   cached or `Unknown` state.
//! - [`SyncClient::push_remote`] returns a [`PushOutcome`] instead of an
//!   error. A failed push never rolls back the local write.
//! - [`SyncClient::spawn_push`] runs the push as a separate task. The patch
//!   is built by the caller before spawning, so the task carries the value
//!   as it was at call time even if a later write supersedes it.
//!
//! Nothing here retries. The next explicit user action is the retry.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use jobsight_core::models::{EntityId, RemotePatch, RemoteRecord};
use jobsight_core::remote::RemoteStore;

/// Result of one remote upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum PushOutcome {
    /// The remote store accepted the write.
    Synced,
    /// The write was attempted and failed; the local copy stands.
    Failed(String),
    /// No remote store is configured.
    Disabled,
    /// Nothing was written locally, so nothing was pushed.
    Skipped,
}

impl PushOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

/// A push running in the background.
pub struct PendingPush {
    handle: JoinHandle<PushOutcome>,
}

impl PendingPush {
    fn ready(outcome: PushOutcome) -> Self {
        Self {
            handle: tokio::spawn(async move { outcome }),
        }
    }

    /// Wait for the push to finish.
    pub async fn outcome(self) -> PushOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => PushOutcome::Failed(format!("push task did not complete: {}", e)),
        }
    }
}

/// Read-through / write-through client for one remote store.
#[derive(Clone, Default)]
pub struct SyncClient {
    remote: Option<Arc<dyn RemoteStore>>,
}

impl SyncClient {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote: Some(remote),
        }
    }

    /// A client with no remote store; reads miss and pushes are `Disabled`.
    pub fn disabled() -> Self {
        Self { remote: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    /// Read a job from the remote store. Transport failures read as a miss.
    pub async fn fetch_remote(&self, id: &EntityId) -> Option<RemoteRecord> {
        let remote = self.remote.as_ref()?;
        match remote.fetch(id).await {
            Ok(Some(record)) => {
                tracing::debug!(job = %id, store = remote.name(), "remote hit");
                Some(record)
            }
            Ok(None) => {
                tracing::debug!(job = %id, store = remote.name(), "remote miss");
                None
            }
            Err(e) => {
                tracing::warn!(
                    job = %id,
                    store = remote.name(),
                    error = %format!("{:#}", e),
                    "remote fetch failed; treating as not found"
                );
                None
            }
        }
    }

    /// Upsert a patch and report whether the remote store accepted it.
    pub async fn push_remote(&self, patch: &RemotePatch) -> PushOutcome {
        let Some(remote) = self.remote.as_ref() else {
            return PushOutcome::Disabled;
        };
        match remote.upsert(patch).await {
            Ok(()) => {
                tracing::info!(job = %patch.id, store = remote.name(), "synced to remote");
                PushOutcome::Synced
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(
                    job = %patch.id,
                    store = remote.name(),
                    error = %message,
                    "remote push failed; local copy kept"
                );
                PushOutcome::Failed(message)
            }
        }
    }

    /// Start a push in the background with the given snapshot.
    pub fn spawn_push(&self, patch: RemotePatch) -> PendingPush {
        if !self.is_enabled() {
            return PendingPush::ready(PushOutcome::Disabled);
        }
        let client = self.clone();
        PendingPush {
            handle: tokio::spawn(async move { client.push_remote(&patch).await }),
        }
    }
}
