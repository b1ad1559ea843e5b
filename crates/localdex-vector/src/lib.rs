//! localdex-vector
//!
//! Nearest-neighbour stores, one physical store per modality: LanceDB for
//! real indexes and a brute-force in-memory store for tests and small
//! projects. Both return cosine scores normalized to `[0, 1]`.

pub mod lance;
pub mod memory;
pub mod schema;
pub mod table;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use localdex_core::config::VectorBackend;
use localdex_core::traits::VectorStore;

pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;

/// Opens the configured backend in `dir` for vectors of width `dim`.
pub async fn open_vector_store(backend: VectorBackend, dir: &Path, dim: usize) -> Result<Arc<dyn VectorStore>> {
    Ok(match backend {
        VectorBackend::Lance => Arc::new(LanceVectorStore::open(dir, dim).await?),
        VectorBackend::Memory => Arc::new(MemoryVectorStore::open(dir, dim)?),
    })
}
