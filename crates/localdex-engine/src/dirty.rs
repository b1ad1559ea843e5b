//! Persisted set of paths with pending work, used by the lazy strategy.
//!
//! Each path is either `modified` or `deleted`, never both; the latest mark
//! wins. Every entry carries a sequence number so a flush only clears the
//! entries it actually processed, not ones re-marked while it ran.

use std::collections::BTreeMap;
use std::path::PathBuf;

use localdex_core::error::Result;
use localdex_core::persist;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirtyKind {
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyEntry {
    pub kind: DirtyKind,
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirtyFile {
    next_seq: u64,
    entries: BTreeMap<String, DirtyEntry>,
}

#[derive(Debug)]
pub struct DirtyTracker {
    path: PathBuf,
    state: DirtyFile,
}

impl DirtyTracker {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = persist::read_json(&path)?.unwrap_or_default();
        Ok(Self { path, state })
    }

    /// Records `kind` for `rel` and persists the change.
    pub fn mark(&mut self, rel: &str, kind: DirtyKind) -> Result<()> {
        let seq = self.state.next_seq;
        self.state.next_seq += 1;
        self.state.entries.insert(rel.to_string(), DirtyEntry { kind, seq });
        self.save()
    }

    /// Pending entries, deletions first, then modifications, each by path.
    pub fn snapshot(&self) -> Vec<(String, DirtyEntry)> {
        let mut out: Vec<_> = self.state.entries.iter().map(|(p, e)| (p.clone(), e.clone())).collect();
        out.sort_by_key(|(p, e)| (e.kind != DirtyKind::Deleted, p.clone()));
        out
    }

    /// Clears `rel` if it still holds exactly `entry`. Returns whether it did.
    pub fn resolve(&mut self, rel: &str, entry: &DirtyEntry) -> bool {
        if self.state.entries.get(rel) == Some(entry) {
            self.state.entries.remove(rel);
            return true;
        }
        false
    }

    pub fn get(&self, rel: &str) -> Option<DirtyKind> {
        self.state.entries.get(rel).map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.state.entries.clear();
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        persist::write_json(&self.path, &self.state)
    }
}
