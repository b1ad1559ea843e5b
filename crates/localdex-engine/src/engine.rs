//! Indexing pipeline for one project: sweep, delta, chunk, embed, store.
//!
//! Every mutation goes through the state mutex, so writes to the stores and
//! to the fingerprint files never overlap. Stores are flushed before the
//! fingerprints that describe them are saved, and a file's fingerprint is
//! only set once all of its chunks were written.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use localdex_core::chunker::Chunker;
use localdex_core::config::{write_default_config, Settings, StrategyName};
use localdex_core::error::{Error, ResourceKind, Result};
use localdex_core::fingerprint::{calculate_delta, hash_file, FingerprintMap, FingerprintStore};
use localdex_core::layout::IndexLayout;
use localdex_core::metadata::IndexMetadata;
use localdex_core::policy::{relativize, PolicyEngine};
use localdex_core::traits::{Embedder, LexicalStore, VectorStore};
use localdex_core::types::{Chunk, EngineSelection, Modality, SearchHit, SearchMode, SearchResult};
use localdex_embed::EmbedderSet;
use localdex_hybrid::{fuse, interleave, overfetch, FusionParams};
use localdex_text::{native_availability, open_lexical, select_engine};
use localdex_vector::open_vector_store;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::lock::IndexLock;
use crate::resources::{check_resources, ResourceProbe};

/// Outcome of a full index run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Files (re)written during this run.
    pub files_indexed: usize,
    pub chunks_created: usize,
    pub files_removed: usize,
    /// Files skipped because they vanished or could not be fully embedded.
    pub files_failed: usize,
    /// Files tracked by the index after the run.
    pub files_total: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub path: String,
}

pub type ProgressFn<'a> = &'a (dyn Fn(&Progress) + Send + Sync);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum UpdateOutcome {
    Indexed { chunks: usize },
    Unchanged,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub engine_selection: Option<EngineSelection>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub storage_size: u64,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
}

/// Paths a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    pub removed: usize,
    pub reindexed: usize,
    pub failed: usize,
}

struct Fingerprints {
    code: FingerprintStore,
    prose: FingerprintStore,
}

impl Fingerprints {
    fn load(layout: &IndexLayout) -> Result<Self> {
        Ok(Self {
            code: FingerprintStore::load(layout.fingerprints_path(Modality::Code))?,
            prose: FingerprintStore::load(layout.fingerprints_path(Modality::Prose))?,
        })
    }

    fn get(&self, m: Modality) -> &FingerprintStore {
        match m {
            Modality::Code => &self.code,
            Modality::Prose => &self.prose,
        }
    }

    fn get_mut(&mut self, m: Modality) -> &mut FingerprintStore {
        match m {
            Modality::Code => &mut self.code,
            Modality::Prose => &mut self.prose,
        }
    }

    fn holders(&self, rel: &str) -> Vec<Modality> {
        Modality::ALL.into_iter().filter(|m| self.get(*m).get(rel).is_some()).collect()
    }

    fn total(&self) -> usize {
        self.code.len() + self.prose.len()
    }

    fn combined(&self) -> FingerprintMap {
        self.code.map().iter().chain(self.prose.map()).map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn save(&self) -> Result<()> {
        self.code.save()?;
        self.prose.save()
    }
}

struct State {
    fingerprints: Fingerprints,
    metadata: IndexMetadata,
    vectors: BTreeMap<Modality, Arc<dyn VectorStore>>,
    lexical: Option<Arc<dyn LexicalStore>>,
}

/// A file scheduled for writing, with its hash when already known.
struct Planned {
    modality: Modality,
    rel: String,
    abs: PathBuf,
    hash: Option<String>,
}

struct Written {
    chunks: usize,
    complete: bool,
}

pub struct IndexEngine {
    root: PathBuf,
    layout: IndexLayout,
    settings: Settings,
    policy: PolicyEngine,
    code_chunker: Chunker,
    prose_chunker: Chunker,
    embedders: EmbedderSet,
    probe: Arc<dyn ResourceProbe>,
    bulk: IndexLock,
    state: Mutex<State>,
}

impl IndexEngine {
    pub fn open(
        root: &Path,
        layout: IndexLayout,
        settings: Settings,
        embedders: EmbedderSet,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self> {
        let root = root.to_path_buf();
        let policy = PolicyEngine::new(&root, &settings)?;
        let fingerprints = Fingerprints::load(&layout)?;
        let metadata = IndexMetadata::load(&layout.metadata_path())?.unwrap_or_else(|| IndexMetadata::new(&root));
        let streaming = settings.streaming_threshold_bytes;
        Ok(Self {
            code_chunker: Chunker::new(settings.chunking.code.clone(), streaming),
            prose_chunker: Chunker::new(settings.chunking.prose.clone(), streaming),
            root,
            layout,
            settings,
            policy,
            embedders,
            probe,
            bulk: IndexLock::new(),
            state: Mutex::new(State { fingerprints, metadata, vectors: BTreeMap::new(), lexical: None }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Whether an index has been written for this project.
    pub fn exists(&self) -> bool {
        self.layout.metadata_path().exists()
    }

    fn chunker(&self, m: Modality) -> &Chunker {
        match m {
            Modality::Code => &self.code_chunker,
            Modality::Prose => &self.prose_chunker,
        }
    }

    fn embedder(&self, m: Modality) -> Result<Arc<dyn Embedder>> {
        self.embedders.get(m).map_err(|e| Error::Embedding(format!("loading the {m} model failed: {e:#}")))
    }

    async fn vector_store(&self, state: &mut State, m: Modality) -> Result<Arc<dyn VectorStore>> {
        if let Some(store) = state.vectors.get(&m) {
            return Ok(store.clone());
        }
        let embedder = self.embedder(m)?;
        let profile = embedder.profile();
        if let Some(recorded) = state.metadata.models.get(&m) {
            if recorded != &profile.model_id {
                warn!(modality = %m, recorded = %recorded, current = %profile.model_id, "embedding model changed since the index was built");
            }
        }
        let store = open_vector_store(self.settings.vector_backend, &self.layout.vectors_dir(m), profile.dim).await?;
        state.metadata.models.insert(m, profile.model_id.clone());
        state.vectors.insert(m, store.clone());
        Ok(store)
    }

    async fn lexical_store(&self, state: &mut State) -> Result<Arc<dyn LexicalStore>> {
        if let Some(store) = &state.lexical {
            return Ok(store.clone());
        }
        let selection = match &state.metadata.engine_selection {
            Some(s) => s.clone(),
            None => select_engine(
                self.settings.lexical_engine,
                state.fingerprints.total(),
                self.settings.native_threshold_files,
                native_availability(),
            ),
        };
        let (store, used) = open_lexical(&selection, &self.layout.lexical_dir())?;
        if used.engine != selection.engine {
            warn!(reason = %used.reason, "lexical engine fell back");
        }
        state.metadata.engine_selection = Some(used);
        state.lexical = Some(store.clone());
        Ok(store)
    }

    /// Opens the vector stores of every modality that has data on disk.
    async fn open_existing_vectors(&self, state: &mut State) -> Result<()> {
        for m in Modality::ALL {
            if !state.fingerprints.get(m).is_empty() || self.layout.vectors_dir(m).exists() {
                self.vector_store(state, m).await?;
            }
        }
        Ok(())
    }

    /// Keeps the recorded lexical engine unless the configured preference
    /// changed. Returns true when the lexical store was wiped and every file
    /// has to be written again.
    async fn reselect_lexical(&self, state: &mut State, file_count: usize) -> Result<bool> {
        let pref = self.settings.lexical_engine;
        let desired = select_engine(pref, file_count, self.settings.native_threshold_files, native_availability());
        let rebuild = match &state.metadata.engine_selection {
            Some(recorded) if recorded.preference.as_deref() == Some(pref.as_str()) => return Ok(false),
            Some(recorded) => {
                info!(from = %recorded.engine, to = %desired.engine, reason = %desired.reason, "lexical engine reconfigured");
                true
            }
            // Indexes written before lexical search existed have no lexical data.
            None => state.fingerprints.total() > 0,
        };
        if let Some(old) = state.lexical.take() {
            if let Err(e) = old.close().await {
                warn!(error = %format!("{e:#}"), "closing previous lexical store failed");
            }
        }
        if rebuild {
            let dir = self.layout.lexical_dir();
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        state.metadata.engine_selection = Some(desired);
        Ok(rebuild)
    }

    /// Deletes every stored chunk of `rel`: lexical, plus each vector store
    /// that is open or tracks the path.
    async fn purge(&self, state: &mut State, rel: &str) -> Result<()> {
        for m in state.fingerprints.holders(rel) {
            self.vector_store(state, m).await?;
        }
        let lexical = self.lexical_store(state).await?;
        lexical.remove_by_path(rel).await?;
        for store in state.vectors.values() {
            store.remove_by_path(rel).await?;
        }
        Ok(())
    }

    async fn write_file(&self, state: &mut State, item: &Planned) -> Result<Written> {
        let Planned { modality: m, rel, abs, hash } = item;
        let hash = match hash {
            Some(h) => h.clone(),
            None => hash_file(abs)?,
        };
        let chunks = self.chunker(*m).chunk_file(rel, abs, &hash)?;
        let embedder = self.embedder(*m)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))?;
        for (i, why) in &batch.failures {
            warn!(path = %rel, chunk = i, error = %why, "dropping chunk that failed to embed");
        }
        let complete = batch.is_complete();
        let mut kept: Vec<Chunk> = Vec::with_capacity(batch.embedded.len());
        let mut vectors = Vec::with_capacity(batch.embedded.len());
        for (i, v) in batch.embedded {
            if let Some(c) = chunks.get(i) {
                kept.push(c.clone());
                vectors.push(v);
            }
        }

        self.purge(state, rel).await?;
        // Old chunks are gone; until the rewrite lands the file must look unindexed.
        for any in Modality::ALL {
            state.fingerprints.get_mut(any).remove(rel);
        }
        let vector = self.vector_store(state, *m).await?;
        let lexical = self.lexical_store(state).await?;
        lexical.upsert(&chunks).await?;
        vector.upsert(&kept, &vectors).await?;

        // A partial embed stays unfingerprinted so the next run retries the file.
        if complete {
            state.fingerprints.get_mut(*m).set(rel, &hash);
        }
        debug!(path = %rel, modality = %m, chunks = chunks.len(), embedded = kept.len(), "indexed file");
        Ok(Written { chunks: chunks.len(), complete })
    }

    /// Flushes the stores, then saves fingerprints and metadata.
    async fn persist(&self, state: &mut State) -> Result<()> {
        let lexical = self.lexical_store(state).await?;
        lexical.flush().await?;
        for store in state.vectors.values() {
            store.flush().await?;
        }
        state.fingerprints.save()?;
        state.metadata.files_indexed = state.fingerprints.total();
        state.metadata.chunks_indexed = lexical.count().await?;
        state.metadata.strategy.get_or_insert(self.settings.strategy);
        state.metadata.touch();
        state.metadata.save(&self.layout.metadata_path())?;
        Ok(())
    }

    /// Brings the whole project up to date: unchanged files are skipped,
    /// changed and new ones rewritten, vanished ones removed.
    pub async fn create_full_index(&self, progress: Option<ProgressFn<'_>>) -> Result<IndexReport> {
        let started = Instant::now();
        let _bulk = self.bulk.try_acquire("full index")?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if write_default_config(self.layout.dir())? {
            info!(path = %self.layout.config_path().display(), "wrote default index configuration");
        }
        let files = self.policy.sweep();
        if files.len() > self.settings.max_files {
            return Err(Error::Resource {
                kind: ResourceKind::FileCount,
                detail: format!("{} indexable files exceeds max_files = {}", files.len(), self.settings.max_files),
            });
        }
        info!(root = %self.root.display(), files = files.len(), "starting full index");
        let rebuild = self.reselect_lexical(state, files.len()).await?;

        let mut by_modality: BTreeMap<Modality, Vec<(String, PathBuf)>> = BTreeMap::new();
        for (rel, abs) in files {
            by_modality.entry(self.policy.modality_for(&rel)).or_default().push((rel, abs));
        }
        let mut removed = Vec::new();
        let mut plan = Vec::new();
        for m in Modality::ALL {
            let current = by_modality.remove(&m).unwrap_or_default();
            let (delta, hashes) = calculate_delta(state.fingerprints.get(m).map(), &current);
            debug!(
                modality = %m,
                added = delta.added.len(),
                modified = delta.modified.len(),
                removed = delta.removed.len(),
                unchanged = delta.unchanged.len(),
                "computed delta"
            );
            removed.extend(delta.removed.iter().map(|rel| (m, rel.clone())));
            let abs_of: BTreeMap<&str, &PathBuf> = current.iter().map(|(r, a)| (r.as_str(), a)).collect();
            let unchanged = delta.unchanged.iter().filter(|_| rebuild);
            for rel in delta.to_index().chain(unchanged) {
                if let Some(abs) = abs_of.get(rel.as_str()) {
                    plan.push(Planned { modality: m, rel: rel.clone(), abs: (*abs).clone(), hash: hashes.get(rel).cloned() });
                }
            }
        }
        for m in Modality::ALL {
            if plan.iter().any(|p| p.modality == m) {
                self.embedder(m)?;
            }
        }

        let mut report = IndexReport::default();
        for (m, rel) in &removed {
            // A path that only changed modality is rewritten below.
            // Its old fingerprint stays so the rewrite purges the old store.
            let moved = plan.iter().any(|p| &p.rel == rel);
            if !moved {
                self.purge(state, rel).await?;
                state.fingerprints.get_mut(*m).remove(rel);
            }
            report.files_removed += 1;
        }

        let total = plan.len();
        let check_every = self.settings.resources.check_every_files.max(1);
        for (i, item) in plan.iter().enumerate() {
            if i > 0 && i % check_every == 0 {
                if let Err(e) = check_resources(self.probe.as_ref(), &self.settings.resources, self.layout.dir()) {
                    warn!(done = i, total, error = %e, "stopping full index early; keeping completed work");
                    self.persist(state).await?;
                    return Err(e);
                }
            }
            match self.write_file(state, item).await {
                Ok(w) => {
                    report.chunks_created += w.chunks;
                    if w.complete {
                        report.files_indexed += 1;
                    } else {
                        report.files_failed += 1;
                    }
                }
                Err(Error::Io(e)) => {
                    warn!(path = %item.rel, error = %e, "skipping unreadable file");
                    report.files_failed += 1;
                }
                Err(e) => {
                    self.persist(state).await?;
                    return Err(e);
                }
            }
            if let Some(cb) = progress {
                cb(&Progress { done: i + 1, total, path: item.rel.clone() });
            }
        }

        self.persist(state).await?;
        report.files_total = state.fingerprints.total();
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            indexed = report.files_indexed,
            chunks = report.chunks_created,
            removed = report.files_removed,
            failed = report.files_failed,
            ms = report.duration_ms,
            "full index finished"
        );
        Ok(report)
    }

    /// Re-chunks, re-embeds and re-stores one file named by the caller.
    /// A path that no longer exists is removed from the index.
    pub async fn update_file(&self, path: &str) -> Result<UpdateOutcome> {
        let (rel, abs, decision) = self.policy.check_explicit(path)?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !abs.exists() {
            return self.remove_locked(state, &rel).await.map(|_| UpdateOutcome::Removed);
        }
        if !decision.index {
            if !state.fingerprints.holders(&rel).is_empty() {
                self.remove_locked(state, &rel).await?;
            }
            return Err(Error::PolicyRejected { path: rel, reason: decision.reason });
        }
        let m = self.policy.modality_for(&rel);
        let hash = hash_file(&abs)?;
        if state.fingerprints.get(m).get(&rel) == Some(hash.as_str()) {
            debug!(path = %rel, "unchanged");
            return Ok(UpdateOutcome::Unchanged);
        }
        let written = self.write_file(state, &Planned { modality: m, rel: rel.clone(), abs, hash: Some(hash) }).await?;
        self.persist(state).await?;
        if !written.complete {
            return Err(Error::Embedding(format!("some chunks of {rel} could not be embedded")));
        }
        Ok(UpdateOutcome::Indexed { chunks: written.chunks })
    }

    /// Drops a path from both stores and the fingerprints. Returns whether
    /// the path was tracked.
    pub async fn remove_file(&self, path: &str) -> Result<bool> {
        let rel = relativize(&self.root, Path::new(path))?;
        let mut guard = self.state.lock().await;
        self.remove_locked(&mut guard, &rel).await
    }

    async fn remove_locked(&self, state: &mut State, rel: &str) -> Result<bool> {
        let holders = state.fingerprints.holders(rel);
        if holders.is_empty() {
            return Ok(false);
        }
        self.purge(state, rel).await?;
        for m in holders {
            state.fingerprints.get_mut(m).remove(rel);
        }
        self.persist(state).await?;
        debug!(path = %rel, "removed from index");
        Ok(true)
    }

    /// Ranked results for `query`. In hybrid mode both stores are queried
    /// concurrently, over-fetched, then fused by rank.
    pub async fn search(&self, query: &str, top_k: usize, mode: SearchMode, alpha: Option<f32>) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let alpha = alpha.unwrap_or(self.settings.default_alpha);
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::InvalidConfig(format!("alpha must be within [0, 1], got {alpha}")));
        }
        let fetch = match mode {
            SearchMode::Hybrid => overfetch(top_k, self.settings.overfetch_multiplier),
            _ => top_k,
        };

        let (lexical, vectors) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let lexical = if mode.uses_lexical() { Some(self.lexical_store(state).await?) } else { None };
            let mut vectors = Vec::new();
            if mode.uses_vectors() {
                for m in Modality::ALL {
                    if !state.fingerprints.get(m).is_empty() {
                        vectors.push((m, self.vector_store(state, m).await?));
                    }
                }
            }
            (lexical, vectors)
        };

        let vector_side = async {
            let mut lists: Vec<Vec<SearchHit>> = Vec::with_capacity(vectors.len());
            for (m, store) in &vectors {
                let embedder = self.embedder(*m)?;
                let text = query.to_string();
                let q = tokio::task::spawn_blocking(move || embedder.embed(&text))
                    .await
                    .map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))?
                    .map_err(|e| Error::Embedding(format!("{e:#}")))?;
                lists.push(store.search(&q, fetch).await?);
            }
            // Code and prose similarities come from different models.
            Ok::<_, Error>(interleave(&lists, fetch))
        };
        let lexical_side = async {
            let hits = match &lexical {
                Some(store) => store.search(query, fetch).await?,
                None => Vec::new(),
            };
            Ok::<_, Error>(hits)
        };
        let (mut vector_hits, mut lexical_hits) = tokio::try_join!(vector_side, lexical_side)?;

        let hits = match mode {
            SearchMode::Vector => {
                vector_hits.truncate(top_k);
                vector_hits
            }
            SearchMode::Lexical => {
                lexical_hits.truncate(top_k);
                lexical_hits
            }
            SearchMode::Hybrid => {
                fuse(&vector_hits, &lexical_hits, FusionParams { alpha, offset: self.settings.rrf_offset }, top_k)
            }
        };
        debug!(query, mode = ?mode, results = hits.len(), "search");
        Ok(hits.iter().map(SearchResult::from).collect())
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        EngineStatus {
            engine_selection: state.metadata.engine_selection.clone(),
            last_indexed_at: state.metadata.last_indexed_at,
            storage_size: self.layout.storage_size(),
            files_indexed: state.fingerprints.total(),
            chunks_indexed: state.metadata.chunks_indexed,
        }
    }

    /// Records the active strategy in the metadata of an existing index.
    pub async fn record_strategy(&self, name: StrategyName) -> Result<()> {
        let mut state = self.state.lock().await;
        state.metadata.strategy = Some(name);
        if self.exists() {
            state.metadata.save(&self.layout.metadata_path())?;
        }
        Ok(())
    }

    /// Removes every stored chunk, fingerprint and metadata record. The
    /// user's config file is kept.
    pub async fn delete_index(&self) -> Result<()> {
        let _bulk = self.bulk.try_acquire("delete index")?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !self.exists() && state.fingerprints.total() == 0 {
            return Err(Error::NotFound(format!("no index at {}", self.layout.dir().display())));
        }
        if let Some(lexical) = state.lexical.take() {
            if let Err(e) = lexical.close().await {
                warn!(error = %format!("{e:#}"), "closing lexical store before delete failed");
            }
        }
        for (m, store) in std::mem::take(&mut state.vectors) {
            if let Err(e) = store.close().await {
                warn!(modality = %m, error = %format!("{e:#}"), "closing vector store before delete failed");
            }
        }
        self.layout.clear()?;
        for m in Modality::ALL {
            state.fingerprints.get_mut(m).clear();
        }
        state.metadata = IndexMetadata::new(&self.root);
        info!(dir = %self.layout.dir().display(), "index deleted");
        Ok(())
    }

    /// All fingerprints, regardless of modality.
    pub async fn fingerprints(&self) -> FingerprintMap {
        self.state.lock().await.fingerprints.combined()
    }

    /// Paths that have at least one chunk in the lexical store and in any
    /// vector store, respectively.
    pub async fn stored_paths(&self) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.open_existing_vectors(state).await?;
        let lexical = self.lexical_store(state).await?;
        let lexical_paths = lexical.scan().await?.into_iter().map(|e| e.source_path).collect();
        let mut vector_paths = BTreeSet::new();
        for store in state.vectors.values() {
            vector_paths.extend(store.scan().await?.into_iter().map(|e| e.source_path));
        }
        Ok((lexical_paths, vector_paths))
    }

    /// Applies a corrective pass: `remove` paths are purged even when not
    /// fingerprinted, `reindex` paths are rewritten unconditionally.
    pub async fn reconcile_paths(&self, remove: &[String], reindex: &[(String, PathBuf)]) -> Result<ReconcileCounts> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.open_existing_vectors(state).await?;
        let mut counts = ReconcileCounts::default();
        for rel in remove {
            self.purge(state, rel).await?;
            for m in Modality::ALL {
                state.fingerprints.get_mut(m).remove(rel);
            }
            counts.removed += 1;
        }
        for (rel, abs) in reindex {
            let item = Planned { modality: self.policy.modality_for(rel), rel: rel.clone(), abs: abs.clone(), hash: None };
            match self.write_file(state, &item).await {
                Ok(w) if w.complete => counts.reindexed += 1,
                Ok(_) => counts.failed += 1,
                Err(Error::Io(e)) => {
                    warn!(path = %rel, error = %e, "skipping unreadable file during reconcile");
                    counts.failed += 1;
                }
                Err(e) => {
                    self.persist(state).await?;
                    return Err(e);
                }
            }
        }
        if counts != ReconcileCounts::default() {
            self.persist(state).await?;
        }
        Ok(counts)
    }

    /// Flushes and closes every open store.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(lexical) = state.lexical.take() {
            lexical.close().await?;
        }
        for (_, store) in std::mem::take(&mut state.vectors) {
            store.close().await?;
        }
        Ok(())
    }
}
