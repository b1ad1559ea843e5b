use async_trait::async_trait;

use crate::types::{Chunk, LexicalEngineKind, ModelProfile, SearchHit, StoredEntry};

/// Result of embedding a batch: only the items that succeeded, keyed by their
/// position in the input. Failed items are reported, never zero-filled.
#[derive(Debug, Default)]
pub struct BatchEmbedding {
    pub embedded: Vec<(usize, Vec<f32>)>,
    pub failures: Vec<(usize, String)>,
}

impl BatchEmbedding {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub trait Embedder: Send + Sync {
    fn profile(&self) -> &ModelProfile;

    /// Human-readable device the model runs on, including any fallback note.
    fn device_description(&self) -> String {
        "cpu".to_string()
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embeds each text independently; one failure never poisons the others.
    /// Implementations with a faster batched path must keep this contract.
    fn embed_batch(&self, texts: &[String]) -> BatchEmbedding {
        let dim = self.profile().dim;
        let mut out = BatchEmbedding::default();
        for (i, text) in texts.iter().enumerate() {
            match self.embed(text) {
                Ok(v) if v.len() == dim => out.embedded.push((i, v)),
                Ok(v) => out
                    .failures
                    .push((i, format!("dimension mismatch: expected {dim}, got {}", v.len()))),
                Err(e) => out.failures.push((i, format!("{e:#}"))),
            }
        }
        out
    }
}

/// Nearest-neighbour store for one modality. Scores returned by `search`
/// are already normalized to `[0, 1]`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn dim(&self) -> usize;
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> anyhow::Result<()>;
    async fn remove_by_path(&self, path: &str) -> anyhow::Result<()>;
    async fn search(&self, query: &[f32], k: usize) -> anyhow::Result<Vec<SearchHit>>;
    async fn scan(&self) -> anyhow::Result<Vec<StoredEntry>>;
    async fn count(&self) -> anyhow::Result<usize>;
    async fn flush(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// Ranked keyword store. Each engine normalizes its own scores to `[0, 1]`.
#[async_trait]
pub trait LexicalStore: Send + Sync {
    fn engine(&self) -> LexicalEngineKind;
    async fn upsert(&self, chunks: &[Chunk]) -> anyhow::Result<()>;
    async fn remove_by_path(&self, path: &str) -> anyhow::Result<()>;
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>>;
    async fn scan(&self) -> anyhow::Result<Vec<StoredEntry>>;
    async fn count(&self) -> anyhow::Result<usize>;
    async fn flush(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}
