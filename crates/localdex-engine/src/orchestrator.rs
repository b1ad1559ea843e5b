//! Owns the active indexing strategy and every switch between strategies.
//!
//! A switch flushes and stops the outgoing strategy before the incoming one
//! starts, so no deferred work is lost. Events dispatched during a switch
//! wait for it and then go to the new strategy.

use std::sync::Arc;
use std::time::Duration;

use localdex_core::config::StrategyName;
use localdex_core::error::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::engine::IndexEngine;
use crate::events::FileEvent;
use crate::integrity::{GroundTruth, IntegrityEngine};
use crate::strategy::{GitStrategy, IndexingStrategy, LazyStrategy, RealtimeStrategy, StrategyStats};

pub struct Orchestrator {
    engine: Arc<IndexEngine>,
    current: Mutex<Option<Arc<dyn IndexingStrategy>>>,
}

impl Orchestrator {
    pub fn new(engine: Arc<IndexEngine>) -> Self {
        Self { engine, current: Mutex::new(None) }
    }

    pub fn engine(&self) -> &Arc<IndexEngine> {
        &self.engine
    }

    /// Builds a strategy with the windows from the settings.
    pub fn create_strategy(&self, name: StrategyName) -> Result<Arc<dyn IndexingStrategy>> {
        let settings = self.engine.settings();
        let engine = self.engine.clone();
        Ok(match name {
            StrategyName::Realtime => {
                Arc::new(RealtimeStrategy::new(engine, Duration::from_millis(settings.realtime_debounce_ms)))
            }
            StrategyName::Lazy => Arc::new(LazyStrategy::new(engine, Duration::from_millis(settings.lazy_idle_ms))?),
            StrategyName::Git => Arc::new(GitStrategy::new(engine, Duration::from_millis(settings.git_debounce_ms))),
        })
    }

    /// Makes `name` the active strategy. Setting the active one is a no-op;
    /// if the new strategy fails to initialize the old one stays active.
    pub async fn set_strategy(&self, name: StrategyName) -> Result<()> {
        let strategy = {
            let current = self.current.lock().await;
            if current.as_ref().is_some_and(|s| s.name() == name) {
                return Ok(());
            }
            drop(current);
            self.create_strategy(name)?
        };
        self.install(strategy).await
    }

    /// Replaces the active strategy with `next`.
    pub async fn install(&self, next: Arc<dyn IndexingStrategy>) -> Result<()> {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|s| s.name() == next.name()) {
            return Ok(());
        }
        next.initialize().await?;
        let from = current.as_ref().map(|s| s.name());
        if let Some(old) = current.as_ref() {
            old.flush().await?;
            old.stop().await?;
        }
        if let Err(e) = next.start().await {
            if let Some(old) = current.as_ref() {
                if let Err(restart) = old.start().await {
                    error!(error = %restart, "restarting previous strategy failed");
                }
            }
            return Err(e);
        }
        let name = next.name();
        *current = Some(next);
        drop(current);
        self.engine.record_strategy(name).await?;
        match from {
            Some(from) => info!(from = %from, to = %name, "switched indexing strategy"),
            None => info!(strategy = %name, "indexing strategy active"),
        }
        Ok(())
    }

    pub async fn active(&self) -> Option<Arc<dyn IndexingStrategy>> {
        self.current.lock().await.clone()
    }

    pub async fn active_name(&self) -> Option<StrategyName> {
        self.current.lock().await.as_ref().map(|s| s.name())
    }

    pub async fn stats(&self) -> Option<StrategyStats> {
        self.current.lock().await.as_ref().map(|s| s.stats())
    }

    /// Routes a file event to the active strategy. Without one the event is
    /// dropped.
    pub async fn dispatch(&self, event: FileEvent) -> Result<()> {
        let strategy = self.active().await;
        match strategy {
            Some(s) => s.on_file_event(event).await,
            None => Ok(()),
        }
    }

    pub async fn flush(&self) -> Result<()> {
        match self.active().await {
            Some(s) => s.flush().await,
            None => Ok(()),
        }
    }

    /// Flushes deferred work if the active strategy defers it.
    pub async fn flush_for_query(&self) -> Result<()> {
        match self.active().await {
            Some(s) if s.flushes_before_query() => s.flush().await,
            _ => Ok(()),
        }
    }

    /// Runs a detect-and-reconcile pass after events may have been missed.
    pub async fn recover(&self) -> Result<()> {
        let truth = match self.active_name().await {
            Some(StrategyName::Git) => GroundTruth::Git,
            _ => GroundTruth::Disk,
        };
        self.engine.policy().invalidate_ignore_cache();
        let (report, counts) = IntegrityEngine::new(self.engine.clone()).repair(truth).await?;
        info!(drift = report.len(), reindexed = counts.reindexed, removed = counts.removed, "recovered from missed events");
        Ok(())
    }

    /// Flushes then stops the active strategy and closes the stores.
    pub async fn shutdown(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(s) = current.take() {
            s.flush().await?;
            s.stop().await?;
            info!(strategy = %s.name(), "indexing strategy shut down");
        }
        drop(current);
        self.engine.close().await
    }

    /// Stops the active strategy without flushing it. Used before the index
    /// is destroyed, when deferred work has nowhere to go.
    pub async fn detach(&self) -> Result<Option<StrategyName>> {
        let mut current = self.current.lock().await;
        let Some(s) = current.take() else { return Ok(None) };
        s.stop().await?;
        Ok(Some(s.name()))
    }

    /// Runs [`Orchestrator::shutdown`] when the process receives Ctrl-C.
    /// The returned task finishes once shutdown has completed.
    pub fn install_shutdown_hook(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            if let Err(e) = this.shutdown().await {
                error!(error = %e, "shutdown failed");
            }
        })
    }
}
