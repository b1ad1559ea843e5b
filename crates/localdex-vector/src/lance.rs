//! LanceDB-backed vector store, one table per modality directory.
//!
//! Rows are keyed by chunk id and written with `merge_insert`, so an upsert
//! of an existing id replaces it. Search uses cosine distance and maps it to
//! `1 - d / 2`, which puts every score in `[0, 1]`.

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tracing::debug;

use arrow_array::RecordBatchIterator;
use localdex_core::traits::VectorStore;
use localdex_core::types::{Chunk, SearchHit, SourceKind, StoredEntry};

use crate::schema::{build_chunk_schema, vector_dim, TABLE_NAME};
use crate::table::{batch_to_chunks, chunks_to_batch, distance_col, ensure_table, open_db, sql_literal, string_col};

pub struct LanceVectorStore {
	_conn: Connection,
	table: Table,
	dim: usize,
}

impl LanceVectorStore {
	pub async fn open(dir: &Path, dim: usize) -> Result<Self> {
		let conn = open_db(dir).await?;
		ensure_table(&conn, TABLE_NAME, build_chunk_schema(dim)).await?;
		let table = conn.open_table(TABLE_NAME).execute().await?;
		let schema = table.schema().await?;
		match vector_dim(&schema) {
			Some(existing) if existing == dim => {}
			Some(existing) => bail!("vector table in {} holds {existing}-dim vectors, model produces {dim}", dir.display()),
			None => bail!("vector table in {} has no vector column", dir.display()),
		}
		debug!(dir = %dir.display(), dim, "opened lance vector store");
		Ok(Self { _conn: conn, table, dim })
	}
}

/// Cosine distance lies in `[0, 2]`.
fn distance_to_score(d: f32) -> f32 {
	(1.0 - d / 2.0).clamp(0.0, 1.0)
}

#[async_trait]
impl VectorStore for LanceVectorStore {
	fn dim(&self) -> usize {
		self.dim
	}

	async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
		if chunks.len() != vectors.len() {
			bail!("{} chunks but {} vectors", chunks.len(), vectors.len());
		}
		if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
			bail!("vector has {} dims, table expects {}", bad.len(), self.dim);
		}
		if chunks.is_empty() {
			return Ok(());
		}
		let schema = build_chunk_schema(self.dim);
		let batch = chunks_to_batch(schema.clone(), chunks, vectors, self.dim)?;
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		// Upsert behavior via merge_insert: id is unique
		let mut mi = self.table.merge_insert(&["id"]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		let _ = mi.execute(reader).await?;
		Ok(())
	}

	async fn remove_by_path(&self, path: &str) -> Result<()> {
		self.table.delete(&format!("path = {}", sql_literal(path))).await?;
		Ok(())
	}

	async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
		if query.len() != self.dim {
			bail!("query vector has {} dims, table expects {}", query.len(), self.dim);
		}
		if k == 0 || self.table.count_rows(None).await? == 0 {
			return Ok(Vec::new());
		}
		let mut stream = self
			.table
			.vector_search(query.to_vec())?
			.distance_type(DistanceType::Cosine)
			.select(Select::columns(&["id", "path", "content_hash", "text", "start_line", "end_line"]))
			.limit(k)
			.execute()
			.await?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			let distances = distance_col(&batch)?;
			for (i, chunk) in batch_to_chunks(&batch)?.into_iter().enumerate() {
				hits.push(SearchHit { chunk, score: distance_to_score(distances.value(i)), source: SourceKind::Vector });
			}
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
		hits.truncate(k);
		Ok(hits)
	}

	async fn scan(&self) -> Result<Vec<StoredEntry>> {
		let mut stream = self.table.query().select(Select::columns(&["id", "path", "content_hash"])).execute().await?;
		let mut out = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			let ids = string_col(&batch, "id")?;
			let paths = string_col(&batch, "path")?;
			let hashes = string_col(&batch, "content_hash")?;
			for i in 0..batch.num_rows() {
				out.push(StoredEntry {
					id: ids.value(i).to_string(),
					source_path: paths.value(i).to_string(),
					content_hash: hashes.value(i).to_string(),
				});
			}
		}
		out.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(out)
	}

	async fn count(&self) -> Result<usize> {
		Ok(self.table.count_rows(None).await?)
	}

	// Every lance write commits a new table version before returning.
	async fn flush(&self) -> Result<()> {
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		let rows = self.table.count_rows(None).await?;
		debug!(rows, "closed lance vector store");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cosine_distance_maps_into_unit_range() {
		assert_eq!(distance_to_score(0.0), 1.0);
		assert_eq!(distance_to_score(1.0), 0.5);
		assert_eq!(distance_to_score(2.0), 0.0);
		assert_eq!(distance_to_score(2.5), 0.0);
	}
}
