//! Brute-force cosine vector store.
//!
//! Keeps every vector in memory behind an `RwLock`. With a backing file the
//! contents are written on `flush` and read back on open; without one the
//! store lives only as long as the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use localdex_core::persist;
use localdex_core::traits::VectorStore;
use localdex_core::types::{Chunk, SearchHit, SourceKind, StoredEntry};
use serde::{Deserialize, Serialize};
use tracing::debug;

const FILE_NAME: &str = "vectors.json";

#[derive(Clone, Serialize, Deserialize)]
struct Row {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    dim: usize,
    rows: BTreeMap<String, Row>,
}

struct State {
    rows: BTreeMap<String, Row>,
    dirty: bool,
}

pub struct MemoryVectorStore {
    dim: usize,
    path: Option<PathBuf>,
    state: RwLock<State>,
}

impl MemoryVectorStore {
    pub fn new(dim: usize) -> Self {
        Self { dim, path: None, state: RwLock::new(State { rows: BTreeMap::new(), dirty: false }) }
    }

    /// Opens a store persisted under `dir`, creating it if absent.
    pub fn open(dir: &Path, dim: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(FILE_NAME);
        let rows = match persist::read_json::<Snapshot>(&path)? {
            Some(snap) if snap.dim != dim => {
                bail!("vector file {} holds {}-dim vectors, model produces {dim}", path.display(), snap.dim)
            }
            Some(snap) => snap.rows,
            None => BTreeMap::new(),
        };
        debug!(path = %path.display(), rows = rows.len(), "opened memory vector store");
        Ok(Self { dim, path: Some(path), state: RwLock::new(State { rows, dirty: false }) })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("vector store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| anyhow!("vector store lock poisoned"))
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!("{} chunks but {} vectors", chunks.len(), vectors.len());
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            bail!("vector has {} dims, store expects {}", bad.len(), self.dim);
        }
        let mut state = self.write()?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            state.rows.insert(chunk.id.clone(), Row { chunk: chunk.clone(), vector: vector.clone() });
        }
        state.dirty |= !chunks.is_empty();
        Ok(())
    }

    async fn remove_by_path(&self, path: &str) -> Result<()> {
        let mut state = self.write()?;
        let before = state.rows.len();
        state.rows.retain(|_, r| r.chunk.source_path != path);
        if state.rows.len() != before {
            state.dirty = true;
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dim {
            bail!("query vector has {} dims, store expects {}", query.len(), self.dim);
        }
        let state = self.read()?;
        let mut hits: Vec<SearchHit> = state
            .rows
            .values()
            .map(|r| SearchHit {
                chunk: r.chunk.clone(),
                // Same mapping as a cosine distance d: 1 - d/2.
                score: ((1.0 + cosine_sim(query, &r.vector)) / 2.0).clamp(0.0, 1.0),
                source: SourceKind::Vector,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn scan(&self) -> Result<Vec<StoredEntry>> {
        let state = self.read()?;
        Ok(state
            .rows
            .values()
            .map(|r| StoredEntry {
                id: r.chunk.id.clone(),
                source_path: r.chunk.source_path.clone(),
                content_hash: r.chunk.content_hash.clone(),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.rows.len())
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let mut state = self.write()?;
        if !state.dirty {
            return Ok(());
        }
        let snap = Snapshot { dim: self.dim, rows: state.rows.clone() };
        persist::write_json(path, &snap)?;
        state.dirty = false;
        debug!(rows = snap.rows.len(), "flushed memory vector store");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, idx: usize) -> Chunk {
        Chunk {
            id: Chunk::make_id(path, "abcdef", idx),
            source_path: path.into(),
            text: format!("{path} #{idx}"),
            start_line: idx + 1,
            end_line: idx + 1,
            content_hash: "abcdef".into(),
        }
    }

    #[tokio::test]
    async fn nearest_vector_ranks_first() {
        let store = MemoryVectorStore::new(3);
        store
            .upsert(&[chunk("a.rs", 0), chunk("b.rs", 0)], &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]])
            .await
            .expect("upsert");
        let hits = store.search(&[0.9, 0.1, 0.0], 2).await.expect("search");
        assert_eq!(hits[0].chunk.source_path, "a.rs");
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn rejects_wrong_width() {
        let store = MemoryVectorStore::new(3);
        assert!(store.upsert(&[chunk("a.rs", 0)], &[vec![1.0, 0.0]]).await.is_err());
        assert!(store.search(&[1.0], 1).await.is_err());
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn persisted_store_reloads_after_flush() {
        let dir = tempfile::tempdir().expect("tmp");
        {
            let store = MemoryVectorStore::open(dir.path(), 2).expect("open");
            store.upsert(&[chunk("a.rs", 0), chunk("a.rs", 1), chunk("b.rs", 0)], &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]).await.expect("upsert");
            store.remove_by_path("a.rs").await.expect("remove");
            store.close().await.expect("close");
        }
        let store = MemoryVectorStore::open(dir.path(), 2).expect("reopen");
        let entries = store.scan().await.expect("scan");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_path, "b.rs");
        assert!(MemoryVectorStore::open(dir.path(), 4).is_err());
    }
}
