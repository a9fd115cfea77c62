//! One fetch → diff → notify → commit cycle.
//!
//! [`SyncEngine`] owns its collaborators (source, store, notifier) as trait
//! objects injected at construction.  A cycle is strictly sequential: each
//! step depends on the result of the previous one.
//!
//! ```text
//!  read snapshot ─► fetch ─► diff ─► notify ─► commit
//!                     │                          │
//!                     └─ Retry (no mutation)     └─ SyncError (not Success)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diff::DiffMode;
use crate::notify::{self, NotificationBatch, Notifier};
use crate::poll::{Task, TaskResult};
use crate::source::CircularSource;
use crate::store::{SnapshotStore, StoreError};

/// Default bound on how long emission may hold up the commit.
pub const DEFAULT_EMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Non-transient failure of a cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("snapshot store failed: {0}")]
    Store(#[from] StoreError),
}

/// How the snapshot was changed by a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Unchanged,
    /// This many items were appended.
    Appended(usize),
    /// The snapshot now holds exactly this many items.
    Replaced(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Number of per-item alerts handed to the notifier.
    pub notified: usize,
    pub commit: Commit,
}

/// Outcome reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success(CycleReport),
    /// The source could not be reached; nothing was changed.
    Retry,
}

/// Engine behaviour knobs, usually taken from [`crate::config::Settings`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub diff_mode: DiffMode,
    pub notifications_enabled: bool,
    pub emit_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            diff_mode: DiffMode::default(),
            notifications_enabled: true,
            emit_timeout: DEFAULT_EMIT_TIMEOUT,
        }
    }
}

pub struct SyncEngine {
    source: Arc<dyn CircularSource>,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    options: EngineOptions,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn CircularSource>,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        options: EngineOptions,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            options,
        }
    }

    /// Run a single cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the snapshot could not be read or committed.
    /// In that case the cycle must not be treated as successful.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        let snapshot = self.store.read_all().await?;

        let fetched = match self.source.fetch().await {
            Ok(list) => list,
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "fetch failed, will retry");
                return Ok(CycleOutcome::Retry);
            }
        };

        let diff = self.options.diff_mode.apply(&snapshot, &fetched);
        if !diff.changed {
            debug!(count = fetched.len(), "no change");
            return Ok(CycleOutcome::Success(CycleReport {
                notified: 0,
                commit: Commit::Unchanged,
            }));
        }

        let notified = match notify::build(&diff.new_items) {
            Some(batch) if self.options.notifications_enabled => self.emit(&batch).await,
            Some(_) => {
                debug!(new = diff.new_items.len(), "notifications disabled");
                0
            }
            None => 0,
        };

        let commit = if diff.must_replace {
            self.store.replace_all(&fetched).await?;
            Commit::Replaced(fetched.len())
        } else {
            self.store.append_all(&diff.new_items).await?;
            Commit::Appended(diff.new_items.len())
        };

        info!(
            new = diff.new_items.len(),
            replaced = diff.must_replace,
            notified,
            "snapshot updated"
        );
        Ok(CycleOutcome::Success(CycleReport { notified, commit }))
    }

    /// Hand `batch` to the notifier.  Failures are logged, never propagated.
    async fn emit(&self, batch: &NotificationBatch) -> usize {
        let delivery = self.notifier.notify(batch);
        match tokio::time::timeout(self.options.emit_timeout, delivery).await {
            Ok(Ok(())) => batch.items.len(),
            Ok(Err(e)) => {
                warn!(error = %e, "notification delivery failed");
                0
            }
            Err(_) => {
                warn!(timeout = ?self.options.emit_timeout, "notification delivery timed out");
                0
            }
        }
    }
}

#[async_trait]
impl Task for SyncEngine {
    async fn run(&self) -> TaskResult {
        match self.run_cycle().await {
            Ok(CycleOutcome::Success(_)) => TaskResult::Success,
            Ok(CycleOutcome::Retry) => TaskResult::Retry,
            Err(e) => {
                tracing::error!(error = %e, "sync cycle failed");
                TaskResult::Failure
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
