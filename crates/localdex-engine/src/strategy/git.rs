use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use localdex_core::config::StrategyName;
use localdex_core::error::{Error, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Counters, IndexingStrategy, StrategyStats};
use crate::debounce::Debouncer;
use crate::engine::IndexEngine;
use crate::events::FileEvent;
use crate::integrity::{GroundTruth, IntegrityEngine};

struct Shared {
    integrity: IntegrityEngine,
    running: AsyncMutex<()>,
    counters: Counters,
}

impl Shared {
    async fn reconcile(&self) -> Result<()> {
        let _running = self.running.lock().await;
        match self.integrity.repair(GroundTruth::Git).await {
            Ok((report, counts)) => {
                self.counters.record(true);
                if !report.is_clean() {
                    info!(drift = report.len(), reindexed = counts.reindexed, removed = counts.removed, "applied history change");
                }
                Ok(())
            }
            Err(e) => {
                self.counters.record(false);
                Err(e)
            }
        }
    }
}

/// Ignores single-file events and resynchronises the index whenever the
/// repository history moves (commit, checkout, merge, rebase).
pub struct GitStrategy {
    root: PathBuf,
    shared: Arc<Shared>,
    debouncer: Arc<Debouncer<()>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    forward: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

impl GitStrategy {
    pub fn new(engine: Arc<IndexEngine>, window: Duration) -> Self {
        let root = engine.root().to_path_buf();
        let shared = Arc::new(Shared {
            integrity: IntegrityEngine::new(engine),
            running: AsyncMutex::new(()),
            counters: Counters::default(),
        });
        let handler_shared = shared.clone();
        let debouncer = Arc::new(Debouncer::new(
            window,
            Arc::new(move |()| {
                let shared = handler_shared.clone();
                async move {
                    if let Err(e) = shared.reconcile().await {
                        error!(error = %e, "reconciling after history change failed");
                    }
                }
                .boxed()
            }),
        ));
        Self {
            root,
            shared,
            debouncer,
            watcher: Mutex::new(None),
            forward: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Signals that the history log changed. Debounced over the git window.
    pub fn history_changed(&self) {
        if self.is_active() {
            self.debouncer.trigger(());
        }
    }

    fn git_dir(&self) -> PathBuf {
        self.root.join(".git")
    }
}

fn is_history_path(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == "HEAD")
}

#[async_trait]
impl IndexingStrategy for GitStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::Git
    }

    async fn initialize(&self) -> Result<()> {
        if !self.git_dir().exists() {
            return Err(Error::NotVersioned(self.root.clone()));
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let git_dir = self.git_dir();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if event.paths.iter().any(|p| is_history_path(p)) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "history watcher error"),
        })
        .map_err(|e| Error::Store(e.into()))?;

        // logs/HEAD gains a line per history move; a fresh repository only
        // has HEAD itself.
        let logs = git_dir.join("logs");
        let target = if logs.is_dir() { logs } else { git_dir };
        if target.is_dir() {
            watcher.watch(&target, RecursiveMode::NonRecursive).map_err(|e| Error::Store(e.into()))?;
        } else {
            warn!(path = %target.display(), "git metadata is not a directory; history is not watched");
        }

        let debouncer = self.debouncer.clone();
        let forward = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                debouncer.trigger(());
            }
        });
        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(watcher);
        }
        if let Ok(mut slot) = self.forward.lock() {
            if let Some(old) = slot.replace(forward) {
                old.abort();
            }
        }
        self.active.store(true, Ordering::SeqCst);
        let window_ms = u64::try_from(self.debouncer.window().as_millis()).unwrap_or(u64::MAX);
        info!(path = %target.display(), window_ms, "git strategy started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.watcher.lock() {
            slot.take();
        }
        if let Ok(mut slot) = self.forward.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.debouncer.fire_all().await;
        info!("git strategy stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn on_file_event(&self, event: FileEvent) -> Result<()> {
        debug!(path = %event.path, "git strategy ignores file events");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.shared.reconcile().await
    }

    fn stats(&self) -> StrategyStats {
        self.shared.counters.stats(StrategyName::Git, self.is_active(), self.debouncer.pending())
    }
}
