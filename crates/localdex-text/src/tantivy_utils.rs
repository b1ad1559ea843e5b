use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

use crate::query::STOP_WORDS;

pub const TOKENIZER: &str = "text_with_stopwords";

#[derive(Debug, Clone, Copy)]
pub struct Fields {
	pub id: Field,
	pub path: Field,
	pub hash: Field,
	pub start_line: Field,
	pub end_line: Field,
	pub text: Field,
}

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	schema_builder.add_text_field("path", STRING | STORED);
	schema_builder.add_text_field("content_hash", STRING | STORED);
	schema_builder.add_u64_field("start_line", STORED);
	schema_builder.add_u64_field("end_line", STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field("text", text_options);
	schema_builder.build()
}

pub fn fields(schema: &Schema) -> tantivy::Result<Fields> {
	Ok(Fields {
		id: schema.get_field("id")?,
		path: schema.get_field("path")?,
		hash: schema.get_field("content_hash")?,
		start_line: schema.get_field("start_line")?,
		end_line: schema.get_field("end_line")?,
		text: schema.get_field("text")?,
	})
}

/// Registers the analyzer the text field indexes with. Its splitting and
/// stop words must agree with `query::tokenize`.
pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TOKENIZER, tokenizer);
}
