//! Whole-file content hashes and the delta computed from them.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::persist;

/// `relative path -> content hash` for every fully indexed file.
pub type FingerprintMap = BTreeMap<String, String>;

const HASH_BATCH: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl Delta {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }

    /// Paths whose chunks must be (re)written.
    pub fn to_index(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Pure diff of stored hashes against current ones. A current entry of
/// `None` is a file that could not be read and is classified as added.
pub fn diff_hashes(stored: &FingerprintMap, current: &BTreeMap<String, Option<String>>) -> Delta {
    let mut delta = Delta::default();
    for (path, hash) in current {
        match (stored.get(path), hash) {
            (_, None) | (None, Some(_)) => delta.added.push(path.clone()),
            (Some(old), Some(new)) if old == new => delta.unchanged.push(path.clone()),
            (Some(_), Some(_)) => delta.modified.push(path.clone()),
        }
    }
    delta.removed = stored.keys().filter(|p| !current.contains_key(*p)).cloned().collect();
    delta
}

/// Hashes `files` in parallel batches and diffs them against `stored`.
/// Returns the delta and the hashes that were computed.
pub fn calculate_delta(stored: &FingerprintMap, files: &[(String, PathBuf)]) -> (Delta, FingerprintMap) {
    let current: BTreeMap<String, Option<String>> = files
        .par_chunks(HASH_BATCH)
        .flat_map_iter(|batch| {
            batch.iter().map(|(rel, abs)| {
                let hash = hash_file(abs)
                    .map_err(|e| debug!(path = %rel, error = %e, "unreadable during delta; treating as added"))
                    .ok();
                (rel.clone(), hash)
            })
        })
        .collect();
    let delta = diff_hashes(stored, &current);
    let hashes = current.into_iter().filter_map(|(p, h)| h.map(|h| (p, h))).collect();
    (delta, hashes)
}

/// One modality's fingerprints, persisted with replace-on-write.
#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    map: FingerprintMap,
}

impl FingerprintStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = persist::read_json(&path)?.unwrap_or_default();
        Ok(Self { path, map })
    }

    pub fn map(&self) -> &FingerprintMap {
        &self.map
    }

    pub fn get(&self, rel: &str) -> Option<&str> {
        self.map.get(rel).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn set(&mut self, rel: &str, hash: &str) {
        self.map.insert(rel.to_string(), hash.to_string());
    }

    pub fn remove(&mut self, rel: &str) -> bool {
        self.map.remove(rel).is_some()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn save(&self) -> Result<()> {
        persist::write_json(&self.path, &self.map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(pairs: &[(&str, &str)]) -> FingerprintMap {
        pairs.iter().map(|(p, h)| (p.to_string(), h.to_string())).collect()
    }

    #[test]
    fn diff_classifies_each_path() {
        let before = stored(&[("A", "h1"), ("B", "h2")]);
        let now: BTreeMap<String, Option<String>> = [("A", "h1"), ("B", "h3"), ("C", "h4")]
            .iter()
            .map(|(p, h)| (p.to_string(), Some(h.to_string())))
            .collect();
        let d = diff_hashes(&before, &now);
        assert_eq!(d.modified, vec!["B"]);
        assert_eq!(d.added, vec!["C"]);
        assert!(d.removed.is_empty());
        assert_eq!(d.unchanged, vec!["A"]);
    }

    #[test]
    fn vanished_paths_are_removed_and_unreadable_are_added() {
        let before = stored(&[("A", "h1"), ("gone", "h9")]);
        let mut now = BTreeMap::new();
        now.insert("A".to_string(), None);
        let d = diff_hashes(&before, &now);
        assert_eq!(d.added, vec!["A"]);
        assert_eq!(d.removed, vec!["gone"]);
        assert!(d.has_changes());
    }

    #[test]
    fn delta_hashes_files_on_disk() {
        let dir = tempfile::tempdir().expect("tmp");
        let a = dir.path().join("a.txt");
        fs::write(&a, "alpha").expect("write");
        let files = vec![("a.txt".to_string(), a.clone()), ("missing.txt".to_string(), dir.path().join("missing.txt"))];
        let (d, hashes) = calculate_delta(&FingerprintMap::new(), &files);
        assert_eq!(d.added, vec!["a.txt", "missing.txt"]);
        assert_eq!(hashes.get("a.txt").map(String::as_str), Some(hash_bytes(b"alpha").as_str()));
        assert!(!hashes.contains_key("missing.txt"));

        let (again, _) = calculate_delta(&hashes, &files[..1]);
        assert_eq!(again.unchanged, vec!["a.txt"]);
        assert!(!again.has_changes());
    }

    #[test]
    fn store_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("fingerprints-code.json");
        let mut s = FingerprintStore::load(&path).expect("load empty");
        assert!(s.is_empty());
        s.set("src/lib.rs", "abc");
        s.save().expect("save");
        let back = FingerprintStore::load(&path).expect("reload");
        assert_eq!(back.get("src/lib.rs"), Some("abc"));
    }
}
