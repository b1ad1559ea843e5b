//! In-process BM25 engine with no native dependencies.
//!
//! The whole corpus lives in memory and is persisted as one JSON file on
//! `flush`. Scores are squashed into `[0, 1]` with `s / (1 + s)`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use localdex_core::persist;
use localdex_core::traits::LexicalStore;
use localdex_core::types::{Chunk, LexicalEngineKind, SearchHit, SourceKind, StoredEntry};
use tracing::debug;

use crate::query::{analyze, tokenize, Query};

const K1: f64 = 1.2;
const B: f64 = 0.75;
const FILE_NAME: &str = "bm25.json";

struct Doc {
    chunk: Chunk,
    len: usize,
    freqs: HashMap<String, usize>,
    positions: HashMap<String, Vec<usize>>,
    lowered: String,
}

impl Doc {
    fn new(chunk: Chunk) -> Self {
        let tokens = tokenize(&chunk.text);
        let mut freqs = HashMap::new();
        let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, tok) in &tokens {
            *freqs.entry(tok.clone()).or_insert(0) += 1;
            positions.entry(tok.clone()).or_default().push(*pos);
        }
        let lowered = chunk.text.to_lowercase();
        Self { chunk, len: tokens.len(), freqs, positions, lowered }
    }
}

#[derive(Default)]
struct Corpus {
    docs: BTreeMap<String, Doc>,
    doc_freq: HashMap<String, usize>,
    total_len: usize,
    dirty: bool,
}

impl Corpus {
    fn insert(&mut self, chunk: Chunk) {
        self.remove(&chunk.id);
        let doc = Doc::new(chunk);
        for term in doc.freqs.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += doc.len;
        self.docs.insert(doc.chunk.id.clone(), doc);
        self.dirty = true;
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(doc) = self.docs.remove(id) else { return false };
        for term in doc.freqs.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        self.total_len -= doc.len;
        self.dirty = true;
        true
    }

    fn idf(&self, term: &str) -> f64 {
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        if df == 0.0 {
            return 0.0;
        }
        let n = self.docs.len() as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn bm25(&self, doc: &Doc, terms: &[String]) -> f64 {
        let avg = (self.total_len as f64 / self.docs.len().max(1) as f64).max(1.0);
        terms
            .iter()
            .map(|term| {
                let tf = doc.freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                self.idf(term) * tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * doc.len as f64 / avg))
            })
            .sum()
    }

    fn search(&self, q: &Query, k: usize) -> Vec<SearchHit> {
        let terms = q.positive_terms();
        let mut scored: Vec<(&Doc, f64)> = self
            .docs
            .values()
            .filter(|d| matches(q, d))
            .map(|d| {
                // Prefix and substring hits may have no exact term; keep them ranked above zero.
                let s = self.bm25(d, &terms).max(0.0) + 1e-3;
                (d, s)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.chunk.id.cmp(&b.0.chunk.id)));
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(d, s)| SearchHit { chunk: d.chunk.clone(), score: (s / (1.0 + s)) as f32, source: SourceKind::Text })
            .collect()
    }
}

fn matches(q: &Query, d: &Doc) -> bool {
    match q {
        Query::Term(t) => d.freqs.contains_key(t),
        Query::Prefix(p) => d.freqs.keys().any(|t| t.starts_with(p.as_str())),
        Query::Phrase { terms, slop } => phrase_matches(terms, *slop, d),
        Query::And(qs) => qs.iter().all(|q| matches(q, d)),
        Query::Or(qs) => qs.iter().any(|q| matches(q, d)),
        Query::Not(inner) => !matches(inner, d),
        Query::Substring(words) => words.iter().any(|w| d.lowered.contains(w.as_str())),
    }
}

fn phrase_matches(terms: &[(usize, String)], slop: u32, d: &Doc) -> bool {
    let Some((first_off, first)) = terms.first() else { return false };
    let Some(starts) = d.positions.get(first) else { return false };
    let slop = slop as i64;
    starts.iter().any(|&start| {
        terms[1..].iter().all(|(off, t)| {
            let expected = start as i64 + (*off as i64 - *first_off as i64);
            d.positions
                .get(t)
                .is_some_and(|ps| ps.iter().any(|&p| (p as i64 - expected).abs() <= slop))
        })
    })
}

/// BM25 over an in-memory corpus, persisted to `<dir>/bm25.json`.
pub struct BuiltinLexicalStore {
    path: PathBuf,
    corpus: RwLock<Corpus>,
}

impl BuiltinLexicalStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(FILE_NAME);
        let mut corpus = Corpus::default();
        if let Some(chunks) = persist::read_json::<Vec<Chunk>>(&path)? {
            for c in chunks {
                corpus.insert(c);
            }
        }
        corpus.dirty = false;
        debug!(path = %path.display(), docs = corpus.docs.len(), "opened builtin lexical store");
        Ok(Self { path, corpus: RwLock::new(corpus) })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Corpus>> {
        self.corpus.read().map_err(|_| anyhow!("lexical corpus lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Corpus>> {
        self.corpus.write().map_err(|_| anyhow!("lexical corpus lock poisoned"))
    }
}

#[async_trait]
impl LexicalStore for BuiltinLexicalStore {
    fn engine(&self) -> LexicalEngineKind {
        LexicalEngineKind::Builtin
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        let mut corpus = self.write()?;
        for c in chunks {
            corpus.insert(c.clone());
        }
        Ok(())
    }

    async fn remove_by_path(&self, path: &str) -> Result<()> {
        let mut corpus = self.write()?;
        let ids: Vec<String> = corpus.docs.values().filter(|d| d.chunk.source_path == path).map(|d| d.chunk.id.clone()).collect();
        for id in ids {
            corpus.remove(&id);
        }
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let plan = analyze(query);
        let corpus = self.read()?;
        let Some(primary) = plan.primary else { return Ok(Vec::new()) };
        let hits = corpus.search(&primary, k);
        if hits.is_empty() {
            if let Some(fallback) = plan.fallback {
                return Ok(corpus.search(&fallback, k));
            }
        }
        Ok(hits)
    }

    async fn scan(&self) -> Result<Vec<StoredEntry>> {
        let corpus = self.read()?;
        Ok(corpus
            .docs
            .values()
            .map(|d| StoredEntry {
                id: d.chunk.id.clone(),
                source_path: d.chunk.source_path.clone(),
                content_hash: d.chunk.content_hash.clone(),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.docs.len())
    }

    async fn flush(&self) -> Result<()> {
        let mut corpus = self.write()?;
        if !corpus.dirty {
            return Ok(());
        }
        let chunks: Vec<&Chunk> = corpus.docs.values().map(|d| &d.chunk).collect();
        persist::write_json(&self.path, &chunks)?;
        corpus.dirty = false;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, idx: usize, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id(path, "hash0123456789", idx),
            source_path: path.into(),
            text: text.into(),
            start_line: 1,
            end_line: 1,
            content_hash: "hash0123456789".into(),
        }
    }

    async fn store_with(chunks: &[Chunk]) -> (tempfile::TempDir, BuiltinLexicalStore) {
        let dir = tempfile::tempdir().expect("tmp");
        let store = BuiltinLexicalStore::open(dir.path()).expect("open");
        store.upsert(chunks).await.expect("upsert");
        (dir, store)
    }

    #[tokio::test]
    async fn phrase_first_then_any_term() {
        let (_d, store) = store_with(&[
            chunk("a.rs", 0, "fn parse_config(path) { read the config file }"),
            chunk("b.rs", 0, "config loader and file watcher"),
            chunk("c.rs", 0, "unrelated rendering code"),
        ])
        .await;

        let hits = store.search("config file", 5).await.expect("search");
        assert_eq!(hits.len(), 1, "phrase matches only a.rs");
        assert_eq!(hits[0].chunk.source_path, "a.rs");

        let hits = store.search("watcher config", 5).await.expect("search");
        let paths: Vec<&str> = hits.iter().map(|h| h.chunk.source_path.as_str()).collect();
        assert_eq!(paths[0], "b.rs", "no phrase hit, so any-term fallback ranks b.rs first");
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score < 1.0));
    }

    #[tokio::test]
    async fn operators_and_negation() {
        let (_d, store) = store_with(&[
            chunk("a.rs", 0, "lance vector store"),
            chunk("b.rs", 0, "tantivy lexical store"),
            chunk("c.rs", 0, "legacy lance adapter"),
        ])
        .await;
        let hits = store.search("(lance OR tantivy) NOT legacy", 5).await.expect("search");
        let mut paths: Vec<&str> = hits.iter().map(|h| h.chunk.source_path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);

        let hits = store.search("lexi*", 5).await.expect("prefix");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source_path, "b.rs");
    }

    #[tokio::test]
    async fn malformed_query_uses_substring() {
        let (_d, store) = store_with(&[chunk("a.rs", 0, "let tokenizer = Tokenizer::from_file(path);")]).await;
        let hits = store.search("\"from_fil", 5).await.expect("search");
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn remove_by_path_and_persistence() {
        let (dir, store) =
            store_with(&[chunk("a.rs", 0, "alpha beta"), chunk("a.rs", 1, "gamma"), chunk("b.rs", 0, "alpha")]).await;
        store.remove_by_path("a.rs").await.expect("remove");
        assert_eq!(store.count().await.expect("count"), 1);
        store.flush().await.expect("flush");

        let reopened = BuiltinLexicalStore::open(dir.path()).expect("reopen");
        let entries = reopened.scan().await.expect("scan");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_path, "b.rs");
        assert_eq!(reopened.search("alpha", 3).await.expect("search").len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() {
        let (_d, store) = store_with(&[chunk("a.rs", 0, "old words")]).await;
        store.upsert(&[chunk("a.rs", 0, "new words")]).await.expect("upsert");
        assert_eq!(store.count().await.expect("count"), 1);
        assert!(store.search("old", 3).await.expect("search").is_empty());
    }
}
