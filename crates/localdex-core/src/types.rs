//! Domain types shared by the stores, the embedders and the indexing engine.

use serde::{Deserialize, Serialize};

pub type ChunkId = String;

/// A contiguous, possibly overlapping slice of one file version.
///
/// - `id`: unique chunk identifier (`<path>@<hash prefix>#<index>`)
/// - `source_path`: project-relative path, `/`-separated
/// - `start_line`/`end_line`: 1-based, inclusive; adjacent chunks may share lines
/// - `content_hash`: hash of the *whole file* the chunk was cut from, shared
///   by every chunk of that file version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_path: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content_hash: String,
}

impl Chunk {
    pub fn make_id(source_path: &str, content_hash: &str, index: usize) -> ChunkId {
        let prefix = &content_hash[..content_hash.len().min(12)];
        format!("{source_path}@{prefix}#{index}")
    }
}

/// Which embedding model family a file is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Code,
    Prose,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Code, Modality::Prose];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Code => "code",
            Modality::Prose => "prose",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an embedding model profile. Two profiles never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub modality: Modality,
    pub model_id: String,
    pub display_name: String,
    pub dim: usize,
    pub max_len: usize,
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Vector,
    Text,
}

/// A chunk returned by one store with its score normalized to `[0, 1]`,
/// higher is better. Normalization happens inside each store adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
    pub source: SourceKind,
}

/// Minimal per-chunk view used by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: ChunkId,
    pub source_path: String,
    pub content_hash: String,
}

/// What the caller receives from `search`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub path: String,
    pub text: String,
    pub score: f32,
    pub start_line: usize,
    pub end_line: usize,
}

impl From<&SearchHit> for SearchResult {
    fn from(hit: &SearchHit) -> Self {
        Self {
            path: hit.chunk.source_path.clone(),
            text: hit.chunk.text.clone(),
            score: hit.score,
            start_line: hit.chunk.start_line,
            end_line: hit.chunk.end_line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Lexical,
    #[default]
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vector" | "semantic" => Ok(SearchMode::Vector),
            "lexical" | "keyword" => Ok(SearchMode::Lexical),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode '{other}'")),
        }
    }
}

impl SearchMode {
    pub fn uses_vectors(self) -> bool {
        matches!(self, SearchMode::Vector | SearchMode::Hybrid)
    }

    pub fn uses_lexical(self) -> bool {
        matches!(self, SearchMode::Lexical | SearchMode::Hybrid)
    }
}

/// The lexical backends the engine factory can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LexicalEngineKind {
    /// Pure in-process BM25, always available.
    Builtin,
    /// Tantivy-backed engine, present when compiled with the `native` feature.
    Native,
}

impl std::fmt::Display for LexicalEngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexicalEngineKind::Builtin => f.write_str("builtin"),
            LexicalEngineKind::Native => f.write_str("native"),
        }
    }
}

/// Recorded lexical engine choice and the reason it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSelection {
    pub engine: LexicalEngineKind,
    pub reason: String,
    /// Preference that was configured when the choice was made.
    #[serde(default)]
    pub preference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_embed_hash_prefix_and_index() {
        let id = Chunk::make_id("src/lib.rs", "0123456789abcdef0123", 3);
        assert_eq!(id, "src/lib.rs@0123456789ab#3");
    }

    #[test]
    fn search_mode_parses_aliases() {
        assert_eq!("semantic".parse::<SearchMode>(), Ok(SearchMode::Vector));
        assert_eq!("Keyword".parse::<SearchMode>(), Ok(SearchMode::Lexical));
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }
}
