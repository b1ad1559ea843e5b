//! Tantivy-backed lexical engine.
//!
//! Writes are buffered in the index writer and become searchable on
//! `flush`. Scores are divided by the best score of each result set.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, PhraseQuery, Query as TantivyQuery, RegexQuery, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use localdex_core::traits::LexicalStore;
use localdex_core::types::{Chunk, LexicalEngineKind, SearchHit, SourceKind, StoredEntry};

use crate::query::{analyze, Query};
use crate::tantivy_utils::{build_schema, fields, register_tokenizer, Fields};

const WRITER_HEAP_BYTES: usize = 50_000_000;

pub struct TantivyLexicalStore {
	reader: IndexReader,
	writer: Mutex<Option<IndexWriter>>,
	fields: Fields,
}

impl TantivyLexicalStore {
	pub fn open(dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(dir)?;
		let index = if dir.join("meta.json").exists() {
			Index::open_in_dir(dir)?
		} else {
			Index::create_in_dir(dir, build_schema())?
		};
		register_tokenizer(&index);
		let fields = fields(&index.schema())?;
		let writer: IndexWriter = index.writer(WRITER_HEAP_BYTES)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		debug!(dir = %dir.display(), "opened tantivy lexical store");
		Ok(Self { reader, writer: Mutex::new(Some(writer)), fields })
	}

	fn with_writer<T>(&self, f: impl FnOnce(&mut IndexWriter) -> Result<T>) -> Result<T> {
		let mut guard = self.writer.lock().map_err(|_| anyhow!("tantivy writer lock poisoned"))?;
		let writer = guard.as_mut().ok_or_else(|| anyhow!("tantivy store is closed"))?;
		f(writer)
	}

	fn build(&self, q: &Query) -> Result<Box<dyn TantivyQuery>> {
		let text = self.fields.text;
		let built: Box<dyn TantivyQuery> = match q {
			Query::Term(t) => Box::new(TermQuery::new(Term::from_field_text(text, t), IndexRecordOption::WithFreqs)),
			// Terms come out of the tokenizer as bare alphanumerics, so nothing needs escaping.
			Query::Prefix(p) => Box::new(RegexQuery::from_pattern(&format!("{p}.*"), text)?),
			Query::Phrase { terms, slop } => {
				let terms = terms.iter().map(|(off, t)| (*off, Term::from_field_text(text, t))).collect();
				Box::new(PhraseQuery::new_with_offset_and_slop(terms, *slop))
			}
			Query::And(qs) => {
				let mut clauses = Vec::with_capacity(qs.len());
				for q in qs {
					match q {
						Query::Not(inner) => clauses.push((Occur::MustNot, self.build(inner)?)),
						q => clauses.push((Occur::Must, self.build(q)?)),
					}
				}
				Box::new(BooleanQuery::new(clauses))
			}
			Query::Or(qs) => {
				let clauses = qs.iter().map(|q| Ok((Occur::Should, self.build(q)?))).collect::<Result<Vec<_>>>()?;
				Box::new(BooleanQuery::new(clauses))
			}
			Query::Not(_) => bail!("negation needs a positive clause"),
			Query::Substring(words) => {
				let mut clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = Vec::new();
				for frag in words.iter().flat_map(|w| w.split(|c: char| !c.is_alphanumeric())).filter(|f| !f.is_empty()) {
					clauses.push((Occur::Should, Box::new(RegexQuery::from_pattern(&format!(".*{frag}.*"), text)?)));
				}
				Box::new(BooleanQuery::new(clauses))
			}
		};
		Ok(built)
	}

	fn run(&self, q: &dyn TantivyQuery, k: usize) -> Result<Vec<SearchHit>> {
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(q, &TopDocs::with_limit(k.max(1)))?;
		let best = top_docs.first().map(|(s, _)| *s).unwrap_or(0.0);
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let score = if best > 0.0 { (score / best).clamp(0.0, 1.0) } else { 1.0 };
			hits.push(SearchHit { chunk: self.to_chunk(&doc), score, source: SourceKind::Text });
		}
		Ok(hits)
	}

	fn to_chunk(&self, doc: &TantivyDocument) -> Chunk {
		let text = |f| doc.get_first(f).and_then(|v| v.as_str()).unwrap_or_default().to_string();
		let num = |f| doc.get_first(f).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
		Chunk {
			id: text(self.fields.id),
			source_path: text(self.fields.path),
			text: text(self.fields.text),
			start_line: num(self.fields.start_line),
			end_line: num(self.fields.end_line),
			content_hash: text(self.fields.hash),
		}
	}
}

#[async_trait]
impl LexicalStore for TantivyLexicalStore {
	fn engine(&self) -> LexicalEngineKind {
		LexicalEngineKind::Native
	}

	async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
		let f = self.fields;
		self.with_writer(|w| {
			for c in chunks {
				w.delete_term(Term::from_field_text(f.id, &c.id));
				w.add_document(doc!(
					f.id => c.id.clone(),
					f.path => c.source_path.clone(),
					f.hash => c.content_hash.clone(),
					f.start_line => c.start_line as u64,
					f.end_line => c.end_line as u64,
					f.text => c.text.clone(),
				))?;
			}
			Ok(())
		})
	}

	async fn remove_by_path(&self, path: &str) -> Result<()> {
		let field = self.fields.path;
		self.with_writer(|w| {
			w.delete_term(Term::from_field_text(field, path));
			Ok(())
		})
	}

	async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
		let plan = analyze(query);
		let Some(primary) = plan.primary else { return Ok(Vec::new()) };
		let hits = self.run(self.build(&primary)?.as_ref(), k)?;
		if hits.is_empty() {
			if let Some(fallback) = plan.fallback {
				return self.run(self.build(&fallback)?.as_ref(), k);
			}
		}
		Ok(hits)
	}

	async fn scan(&self) -> Result<Vec<StoredEntry>> {
		let searcher = self.reader.searcher();
		let addrs = searcher.search(&AllQuery, &DocSetCollector)?;
		let mut out = Vec::with_capacity(addrs.len());
		for addr in addrs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let c = self.to_chunk(&doc);
			out.push(StoredEntry { id: c.id, source_path: c.source_path, content_hash: c.content_hash });
		}
		out.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(out)
	}

	async fn count(&self) -> Result<usize> {
		Ok(self.reader.searcher().num_docs() as usize)
	}

	async fn flush(&self) -> Result<()> {
		self.with_writer(|w| {
			w.commit()?;
			Ok(())
		})?;
		self.reader.reload()?;
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		let writer = {
			let mut guard = self.writer.lock().map_err(|_| anyhow!("tantivy writer lock poisoned"))?;
			guard.take()
		};
		if let Some(mut w) = writer {
			w.commit()?;
			w.wait_merging_threads()?;
		}
		self.reader.reload()?;
		debug!(docs = self.reader.searcher().num_docs(), "closed tantivy lexical store");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn chunk(path: &str, idx: usize, text: &str) -> Chunk {
		Chunk {
			id: Chunk::make_id(path, "feedface0000", idx),
			source_path: path.into(),
			text: text.into(),
			start_line: idx + 1,
			end_line: idx + 3,
			content_hash: "feedface0000".into(),
		}
	}

	#[tokio::test]
	async fn tantivy_round_trip() {
		let dir = tempfile::tempdir().expect("tmp");
		let store = TantivyLexicalStore::open(dir.path()).expect("open");
		store
			.upsert(&[
				chunk("src/watch.rs", 0, "debounce file events before reindexing"),
				chunk("src/watch.rs", 1, "the watcher forwards events"),
				chunk("docs/intro.md", 0, "an introduction to hybrid search"),
			])
			.await
			.expect("upsert");
		store.flush().await.expect("flush");
		assert_eq!(store.count().await.expect("count"), 3);

		let hits = store.search("file events", 5).await.expect("phrase");
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].chunk.source_path, "src/watch.rs");
		assert_eq!(hits[0].chunk.start_line, 1);
		assert!((hits[0].score - 1.0).abs() < 1e-6);

		let hits = store.search("hybrid events", 5).await.expect("any-term fallback");
		assert_eq!(hits.len(), 3);
		assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

		let hits = store.search("debou*", 5).await.expect("prefix");
		assert_eq!(hits.len(), 1);

		store.remove_by_path("src/watch.rs").await.expect("remove");
		store.flush().await.expect("flush");
		let entries = store.scan().await.expect("scan");
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].source_path, "docs/intro.md");
		store.close().await.expect("close");

		let reopened = TantivyLexicalStore::open(dir.path()).expect("reopen");
		assert_eq!(reopened.count().await.expect("count"), 1);
	}

	#[tokio::test]
	async fn malformed_query_does_not_error() {
		let dir = tempfile::tempdir().expect("tmp");
		let store = TantivyLexicalStore::open(dir.path()).expect("open");
		store.upsert(&[chunk("a.rs", 0, "let tokenizer = Tokenizer::from_file(path);")]).await.expect("upsert");
		store.flush().await.expect("flush");
		let hits = store.search("(from_fil AND", 5).await.expect("substring fallback");
		assert_eq!(hits.len(), 1);
	}
}
