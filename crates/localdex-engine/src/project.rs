//! The operations a tool or CLI layer calls, for one project.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use localdex_core::config::{data_root, Settings, StrategyName};
use localdex_core::error::{Error, Result};
use localdex_core::layout::IndexLayout;
use localdex_core::types::{EngineSelection, SearchMode, SearchResult};
use localdex_embed::EmbedderSet;
use serde::Serialize;
use tracing::info;

use crate::dirty::DirtyTracker;
use crate::engine::{IndexEngine, IndexReport, ProgressFn, UpdateOutcome};
use crate::events::FileEvent;
use crate::integrity::{DriftReport, GroundTruth, IntegrityEngine};
use crate::orchestrator::Orchestrator;
use crate::resources::{ResourceProbe, SystemProbe};
use crate::strategy::StrategyStats;
use crate::watch::ProjectWatcher;
use crate::ReconcileCounts;

/// Overrides for [`ProjectIndex::open_with`]. Anything left `None` comes
/// from the environment: the platform data dir, the layered config, the
/// configured models and the operating system's resource readings.
#[derive(Default)]
pub struct OpenOptions {
    pub data_root: Option<PathBuf>,
    pub settings: Option<Settings>,
    pub embedders: Option<EmbedderSet>,
    pub probe: Option<Arc<dyn ResourceProbe>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub project_path: PathBuf,
    pub index_dir: PathBuf,
    pub exists: bool,
    pub engine_selection: Option<EngineSelection>,
    pub pending_files: usize,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub storage_size: u64,
    pub strategy: StrategyName,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub strategy_stats: Option<StrategyStats>,
}

pub struct ProjectIndex {
    engine: Arc<IndexEngine>,
    orchestrator: Arc<Orchestrator>,
}

impl ProjectIndex {
    pub async fn open(project: &Path) -> Result<Self> {
        Self::open_with(project, OpenOptions::default()).await
    }

    pub async fn open_with(project: &Path, options: OpenOptions) -> Result<Self> {
        let root = project
            .canonicalize()
            .map_err(|e| Error::InvalidConfig(format!("project path {} is not usable: {e}", project.display())))?;
        if !root.is_dir() {
            return Err(Error::InvalidConfig(format!("project path {} is not a directory", root.display())));
        }
        let data_root = match options.data_root {
            Some(dir) => dir,
            None => data_root()?,
        };
        let layout = IndexLayout::open(&data_root, &root)?;
        let settings = match options.settings {
            Some(s) => {
                s.validate()?;
                s
            }
            None => Settings::load(Some(layout.dir()))?,
        };
        let embedders = options.embedders.unwrap_or_else(|| EmbedderSet::from_settings(&settings, layout.dir()));
        let probe = options.probe.unwrap_or_else(|| Arc::new(SystemProbe));
        info!(root = %root.display(), index = %layout.dir().display(), "opened project");
        let engine = Arc::new(IndexEngine::open(&root, layout, settings, embedders, probe)?);
        let orchestrator = Arc::new(Orchestrator::new(engine.clone()));
        Ok(Self { engine, orchestrator })
    }

    pub fn engine(&self) -> &Arc<IndexEngine> {
        &self.engine
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn root(&self) -> &Path {
        self.engine.root()
    }

    pub async fn create_full_index(&self, progress: Option<ProgressFn<'_>>) -> Result<IndexReport> {
        self.engine.create_full_index(progress).await
    }

    pub async fn update_file(&self, path: &str) -> Result<UpdateOutcome> {
        self.engine.update_file(path).await
    }

    pub async fn remove_file(&self, path: &str) -> Result<bool> {
        self.engine.remove_file(path).await
    }

    /// Searches the index. With a deferring strategy active, pending
    /// changes are applied first.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        mode: SearchMode,
        alpha: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        self.orchestrator.flush_for_query().await?;
        self.engine.search(query, top_k, mode, alpha).await
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let engine = self.engine.status().await;
        let stats = self.orchestrator.stats().await;
        let pending_files = match &stats {
            Some(s) => s.pending,
            // Left behind by a lazy session that is not running now.
            None => DirtyTracker::load(self.engine.layout().dirty_path())?.len(),
        };
        Ok(IndexStatus {
            project_path: self.engine.root().to_path_buf(),
            index_dir: self.engine.layout().dir().to_path_buf(),
            exists: self.engine.exists(),
            engine_selection: engine.engine_selection,
            pending_files,
            last_indexed_at: engine.last_indexed_at,
            storage_size: engine.storage_size,
            strategy: stats.as_ref().map(|s| s.name).unwrap_or(self.engine.settings().strategy),
            files_indexed: engine.files_indexed,
            chunks_indexed: engine.chunks_indexed,
            strategy_stats: stats,
        })
    }

    /// Stops any active strategy without applying its deferred work, then
    /// removes the index. The config file survives.
    pub async fn delete_index(&self) -> Result<()> {
        if let Some(name) = self.orchestrator.detach().await? {
            info!(strategy = %name, "stopped strategy before deleting the index");
        }
        self.engine.delete_index().await
    }

    /// Starts `strategy`, or the configured one.
    pub async fn start(&self, strategy: Option<StrategyName>) -> Result<()> {
        self.set_strategy(strategy.unwrap_or(self.engine.settings().strategy)).await
    }

    pub async fn set_strategy(&self, name: StrategyName) -> Result<()> {
        self.orchestrator.set_strategy(name).await
    }

    pub async fn dispatch(&self, event: FileEvent) -> Result<()> {
        self.orchestrator.dispatch(event).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.orchestrator.flush().await
    }

    /// Watches the project tree and feeds changes to the active strategy
    /// until the returned watcher is dropped.
    pub fn watch(&self) -> Result<ProjectWatcher> {
        ProjectWatcher::spawn(self.orchestrator.clone(), self.engine.root())
    }

    pub async fn detect_drift(&self, truth: GroundTruth) -> Result<DriftReport> {
        IntegrityEngine::new(self.engine.clone()).detect_drift(truth).await
    }

    pub async fn repair(&self, truth: GroundTruth) -> Result<(DriftReport, ReconcileCounts)> {
        IntegrityEngine::new(self.engine.clone()).repair(truth).await
    }

    /// Flushes and stops the active strategy, then closes the stores.
    pub async fn shutdown(&self) -> Result<()> {
        self.orchestrator.shutdown().await
    }

    pub fn install_shutdown_hook(&self) -> tokio::task::JoinHandle<()> {
        self.orchestrator.install_shutdown_hook()
    }
}
