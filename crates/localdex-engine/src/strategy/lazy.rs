use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use localdex_core::config::StrategyName;
use localdex_core::error::Result;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{apply_event, is_permanent, Counters, IndexingStrategy, StrategyStats};
use crate::debounce::Debouncer;
use crate::dirty::{DirtyKind, DirtyTracker};
use crate::engine::IndexEngine;
use crate::events::{FileEvent, FileEventKind};

struct Shared {
    engine: Arc<IndexEngine>,
    dirty: Mutex<DirtyTracker>,
    /// Held for the whole of a flush.
    flushing: Mutex<()>,
    counters: Counters,
}

impl Shared {
    /// Applies every pending entry, deletions first. Entries re-marked while
    /// the flush ran stay pending.
    async fn flush(&self) -> Result<usize> {
        let _flushing = self.flushing.lock().await;
        self.flush_locked().await
    }

    async fn flush_locked(&self) -> Result<usize> {
        let entries = self.dirty.lock().await.snapshot();
        if entries.is_empty() {
            return Ok(0);
        }
        info!(pending = entries.len(), "flushing dirty files");
        let mut applied = 0;
        for (rel, entry) in entries {
            let event = match entry.kind {
                DirtyKind::Deleted => FileEvent::deleted(rel.as_str()),
                DirtyKind::Modified => FileEvent::modified(rel.as_str()),
            };
            let outcome = apply_event(&self.engine, &event).await;
            let resolved = match &outcome {
                Ok(()) => true,
                Err(e) if is_permanent(e) => {
                    warn!(path = %rel, error = %e, "dropping dirty entry that cannot be indexed");
                    true
                }
                Err(_) => false,
            };
            self.counters.record(outcome.is_ok());
            if resolved {
                self.dirty.lock().await.resolve(&rel, &entry);
                applied += 1;
            }
            if let Err(e) = outcome {
                if !resolved {
                    self.dirty.lock().await.save()?;
                    return Err(e);
                }
            }
        }
        self.dirty.lock().await.save()?;
        debug!(applied, "flush finished");
        Ok(applied)
    }

    /// Timer-driven flush. Skipped when a flush is already running; that
    /// flush or the next idle period picks up the remaining work.
    async fn idle_flush(self: Arc<Self>, idle: Arc<Debouncer<()>>) {
        let Ok(_flushing) = self.flushing.try_lock() else {
            idle.trigger(());
            return;
        };
        if let Err(e) = self.flush_locked().await {
            error!(error = %e, "idle flush failed");
        }
    }
}

/// Records changes and applies them once the project has been idle, or
/// when a query needs current results.
pub struct LazyStrategy {
    shared: Arc<Shared>,
    idle: Arc<Debouncer<()>>,
    active: AtomicBool,
}

impl LazyStrategy {
    pub fn new(engine: Arc<IndexEngine>, idle_window: Duration) -> Result<Self> {
        let dirty = DirtyTracker::load(engine.layout().dirty_path())?;
        let shared = Arc::new(Shared { engine, dirty: Mutex::new(dirty), flushing: Mutex::new(()), counters: Counters::default() });
        let idle = Arc::new_cyclic(|weak: &std::sync::Weak<Debouncer<()>>| {
            let shared = shared.clone();
            let weak = weak.clone();
            Debouncer::new(
                idle_window,
                Arc::new(move |()| {
                    let shared = shared.clone();
                    let idle = weak.upgrade();
                    async move {
                        if let Some(idle) = idle {
                            shared.idle_flush(idle).await;
                        }
                    }
                    .boxed()
                }),
            )
        });
        Ok(Self { shared, idle, active: AtomicBool::new(false) })
    }

    pub async fn pending(&self) -> usize {
        self.shared.dirty.lock().await.len()
    }
}

#[async_trait]
impl IndexingStrategy for LazyStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::Lazy
    }

    async fn initialize(&self) -> Result<()> {
        let pending = self.pending().await;
        if pending > 0 {
            info!(pending, "restored dirty files from a previous session");
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.active.store(true, Ordering::SeqCst);
        if self.pending().await > 0 {
            self.idle.trigger(());
        }
        info!(idle_ms = u64::try_from(self.idle.window().as_millis()).unwrap_or(u64::MAX), "lazy strategy started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        self.idle.cancel_all();
        let pending = self.pending().await;
        info!(pending, "lazy strategy stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn on_file_event(&self, event: FileEvent) -> Result<()> {
        if !self.is_active() {
            debug!(path = %event.path, "lazy strategy inactive; event ignored");
            return Ok(());
        }
        let kind = match event.kind {
            FileEventKind::Deleted => DirtyKind::Deleted,
            FileEventKind::Created | FileEventKind::Modified => DirtyKind::Modified,
        };
        self.shared.dirty.lock().await.mark(&event.path, kind)?;
        self.idle.trigger(());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.shared.flush().await.map(|_| ())
    }

    fn stats(&self) -> StrategyStats {
        let pending = self.shared.dirty.try_lock().map(|d| d.len()).unwrap_or(0);
        self.shared.counters.stats(StrategyName::Lazy, self.is_active(), pending)
    }

    fn flushes_before_query(&self) -> bool {
        true
    }
}
