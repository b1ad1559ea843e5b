use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const TABLE_NAME: &str = "chunks";

/// One row per chunk. The vector width is fixed per table, so each
/// modality gets its own table with its own `dim`.
pub fn build_chunk_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("path", DataType::Utf8, false),
		Field::new("content_hash", DataType::Utf8, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("start_line", DataType::UInt64, false),
		Field::new("end_line", DataType::UInt64, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true),
	]))
}

/// Width of the `vector` column, if the schema has one.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
	match schema.field_with_name("vector").ok()?.data_type() {
		DataType::FixedSizeList(_, n) => Some(*n as usize),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vector_width_follows_dim() {
		assert_eq!(vector_dim(&build_chunk_schema(384)), Some(384));
		assert_eq!(vector_dim(&build_chunk_schema(1024)), Some(1024));
		assert_eq!(vector_dim(&Schema::new(vec![Field::new("id", DataType::Utf8, false)])), None);
	}
}
