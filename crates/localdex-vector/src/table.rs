//! LanceDB connection and table helpers.
use anyhow::{anyhow, Result};
use lancedb::{connect, Connection};

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray, UInt64Array};
use std::path::Path;
use std::sync::Arc;

use localdex_core::types::Chunk;

pub async fn open_db(dir: &Path) -> Result<Connection> {
    std::fs::create_dir_all(dir)?;
    Ok(connect(dir.to_string_lossy().as_ref()).execute().await?)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    let names = conn.table_names().execute().await?;
    if names.contains(&name.to_string()) {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

/// Builds one record batch from chunks and their (same-length) vectors.
pub fn chunks_to_batch(schema: Arc<arrow_schema::Schema>, chunks: &[Chunk], vectors: &[Vec<f32>], dim: usize) -> Result<RecordBatch> {
    let vecs = vectors.iter().map(|v| Some(v.iter().copied().map(Some).collect::<Vec<_>>()));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.source_path.as_str()))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.content_hash.as_str()))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str()))),
            Arc::new(UInt64Array::from_iter_values(chunks.iter().map(|c| c.start_line as u64))),
            Arc::new(UInt64Array::from_iter_values(chunks.iter().map(|c| c.end_line as u64))),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vecs, dim as i32)),
        ],
    )?;
    Ok(batch)
}

pub fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("column '{name}' missing or not utf8"))
}

pub fn u64_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .ok_or_else(|| anyhow!("column '{name}' missing or not u64"))
}

/// Cosine distance of each row, as reported by a vector search.
pub fn distance_col(batch: &RecordBatch) -> Result<&arrow_array::Float32Array> {
    let col = batch.column_by_name("_distance").ok_or_else(|| anyhow!("vector search returned no _distance column"))?;
    col.as_primitive_opt::<Float32Type>().ok_or_else(|| anyhow!("_distance column is not f32"))
}

/// Rows of a chunk batch turned back into chunks (vectors are dropped).
pub fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let ids = string_col(batch, "id")?;
    let paths = string_col(batch, "path")?;
    let hashes = string_col(batch, "content_hash")?;
    let texts = string_col(batch, "text").ok();
    let starts = u64_col(batch, "start_line").ok();
    let ends = u64_col(batch, "end_line").ok();
    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        out.push(Chunk {
            id: ids.value(i).to_string(),
            source_path: paths.value(i).to_string(),
            content_hash: hashes.value(i).to_string(),
            text: texts.map(|t| t.value(i).to_string()).unwrap_or_default(),
            start_line: starts.map(|s| s.value(i) as usize).unwrap_or(0),
            end_line: ends.map(|e| e.value(i) as usize).unwrap_or(0),
        });
    }
    Ok(out)
}

/// Single-quoted SQL literal for lance filter expressions.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_chunk_schema;

    #[test]
    fn batch_round_trips_chunk_columns() {
        let chunk = Chunk {
            id: "a.rs@abc#0".into(),
            source_path: "a.rs".into(),
            text: "fn main() {}".into(),
            start_line: 1,
            end_line: 1,
            content_hash: "abc".into(),
        };
        let batch = chunks_to_batch(build_chunk_schema(3), std::slice::from_ref(&chunk), &[vec![0.0, 1.0, 0.0]], 3).expect("batch");
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch_to_chunks(&batch).expect("decode"), vec![chunk]);
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(sql_literal("docs/it's.md"), "'docs/it''s.md'");
    }
}
