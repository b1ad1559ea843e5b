//! Indexing strategies: when a file change reaches the stores.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use localdex_core::config::StrategyName;
use localdex_core::error::{Error, Result};
use serde::Serialize;
use tracing::debug;

use crate::engine::{IndexEngine, UpdateOutcome};
use crate::events::{FileEvent, FileEventKind};

mod git;
mod lazy;
mod realtime;

pub use git::GitStrategy;
pub use lazy::LazyStrategy;
pub use realtime::RealtimeStrategy;

#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    pub name: StrategyName,
    pub active: bool,
    /// Paths (or history changes) with work not yet applied.
    pub pending: usize,
    pub processed: u64,
    pub failed: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Lifecycle shared by every strategy. Exactly one is active per index.
#[async_trait]
pub trait IndexingStrategy: Send + Sync {
    fn name(&self) -> StrategyName;

    /// Restores persisted state and checks preconditions.
    async fn initialize(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    /// Stops accepting events. Work already queued is applied first.
    async fn stop(&self) -> Result<()>;

    fn is_active(&self) -> bool;

    async fn on_file_event(&self, event: FileEvent) -> Result<()>;

    /// Applies deferred work now.
    async fn flush(&self) -> Result<()>;

    fn stats(&self) -> StrategyStats;

    /// Whether queries must wait for a flush to see current content.
    fn flushes_before_query(&self) -> bool {
        false
    }
}

/// Counters every strategy keeps.
#[derive(Default)]
pub(crate) struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl Counters {
    pub(crate) fn record(&self, ok: bool) {
        let counter = if ok { &self.processed } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last.lock() {
            *last = Some(Utc::now());
        }
    }

    pub(crate) fn stats(&self, name: StrategyName, active: bool, pending: usize) -> StrategyStats {
        StrategyStats {
            name,
            active,
            pending,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_activity: self.last.lock().ok().and_then(|l| *l),
        }
    }
}

/// Applies one file event to the index. Paths the policy rejects are
/// purged and reported as handled.
pub(crate) async fn apply_event(engine: &IndexEngine, event: &FileEvent) -> Result<()> {
    match event.kind {
        FileEventKind::Deleted => {
            engine.remove_file(&event.path).await?;
        }
        FileEventKind::Created | FileEventKind::Modified => match engine.update_file(&event.path).await {
            Ok(UpdateOutcome::Indexed { chunks }) => debug!(path = %event.path, chunks, "applied change"),
            Ok(_) => {}
            Err(Error::PolicyRejected { path, reason }) => debug!(path = %path, reason = %reason, "not indexable"),
            Err(e) => return Err(e),
        },
    }
    Ok(())
}

/// Errors that retrying the same path will not fix.
pub(crate) fn is_permanent(err: &Error) -> bool {
    matches!(
        err,
        Error::PolicyRejected { .. }
            | Error::Symlink(_)
            | Error::OutsideProject(_)
            | Error::Embedding(_)
            | Error::DimensionMismatch { .. }
    )
}
