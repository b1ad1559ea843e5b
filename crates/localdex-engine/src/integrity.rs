//! Drift detection between the project on disk, the fingerprints and the
//! stores, plus the corrective pass that brings them back in line.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use localdex_core::error::{Error, Result};
use localdex_core::fingerprint::{calculate_delta, Delta};
use localdex_core::policy::PolicyEngine;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engine::{IndexEngine, ReconcileCounts};

/// Where the list of files that should be indexed comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundTruth {
    /// A filesystem sweep under the indexing policy.
    Disk,
    /// Files git tracks or would track, filtered by the same policy.
    Git,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// On disk but never fingerprinted.
    pub added: Vec<String>,
    /// Content differs from the fingerprint.
    pub modified: Vec<String>,
    /// Fingerprinted but gone from disk.
    pub removed: Vec<String>,
    /// Chunks in a store with no fingerprint and no file behind them.
    pub orphaned: Vec<String>,
    /// Fingerprinted and unchanged, yet absent from a store.
    pub missing: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.orphaned.is_empty()
            && self.missing.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len() + self.orphaned.len() + self.missing.len()
    }
}

pub struct IntegrityEngine {
    engine: Arc<IndexEngine>,
}

impl IntegrityEngine {
    pub fn new(engine: Arc<IndexEngine>) -> Self {
        Self { engine }
    }

    /// Indexable files according to `truth`, sorted by path.
    pub async fn ground_truth(&self, truth: GroundTruth) -> Vec<(String, PathBuf)> {
        let policy = self.engine.policy();
        match truth {
            GroundTruth::Disk => policy.sweep(),
            GroundTruth::Git => match git_files(policy).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(error = %e, "git ls-files failed; falling back to a filesystem sweep");
                    policy.sweep()
                }
            },
        }
    }

    pub async fn detect_drift(&self, truth: GroundTruth) -> Result<DriftReport> {
        let files = self.ground_truth(truth).await;
        let fingerprints = self.engine.fingerprints().await;
        let (delta, _) = calculate_delta(&fingerprints, &files);
        let (lexical, vectors) = self.engine.stored_paths().await?;

        let on_disk: BTreeSet<&str> = files.iter().map(|(rel, _)| rel.as_str()).collect();
        let orphaned: Vec<String> = lexical
            .union(&vectors)
            .filter(|p| !fingerprints.contains_key(*p) && !on_disk.contains(p.as_str()))
            .cloned()
            .collect();

        let root = self.engine.root();
        let missing: Vec<String> = delta
            .unchanged
            .iter()
            .filter(|rel| !lexical.contains(*rel) || !vectors.contains(*rel))
            .filter(|rel| has_content(&root.join(rel)))
            .cloned()
            .collect();

        let Delta { added, modified, removed, .. } = delta;
        let report = DriftReport { added, modified, removed, orphaned, missing };
        debug!(
            added = report.added.len(),
            modified = report.modified.len(),
            removed = report.removed.len(),
            orphaned = report.orphaned.len(),
            missing = report.missing.len(),
            "drift detected"
        );
        Ok(report)
    }

    /// Purges removed and orphaned paths, then rewrites added, modified and
    /// missing ones.
    pub async fn reconcile(&self, report: &DriftReport) -> Result<ReconcileCounts> {
        if report.is_clean() {
            return Ok(ReconcileCounts::default());
        }
        let remove: Vec<String> = report.removed.iter().chain(&report.orphaned).cloned().collect();
        let root = self.engine.root();
        let reindex: Vec<(String, PathBuf)> = report
            .added
            .iter()
            .chain(&report.modified)
            .chain(&report.missing)
            .map(|rel| (rel.clone(), root.join(rel)))
            .collect();
        let counts = self.engine.reconcile_paths(&remove, &reindex).await?;
        info!(removed = counts.removed, reindexed = counts.reindexed, failed = counts.failed, "reconciled index");
        Ok(counts)
    }

    pub async fn repair(&self, truth: GroundTruth) -> Result<(DriftReport, ReconcileCounts)> {
        let report = self.detect_drift(truth).await?;
        let counts = self.reconcile(&report).await?;
        Ok((report, counts))
    }
}

/// Whitespace-only files never produce chunks, so their absence from a
/// store is expected.
fn has_content(path: &Path) -> bool {
    fs::read(path).map(|bytes| bytes.iter().any(|b| !b.is_ascii_whitespace())).unwrap_or(false)
}

/// Tracked plus untracked-but-not-ignored files, filtered by the policy.
async fn git_files(policy: &PolicyEngine) -> Result<Vec<(String, PathBuf)>> {
    let root = policy.root();
    let output = Command::new("git")
        .args(["-C", &root.to_string_lossy(), "ls-files", "-z", "--cached", "--others", "--exclude-standard"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::NotVersioned(root.to_path_buf()));
    }
    let mut files: Vec<(String, PathBuf)> = output
        .stdout
        .split(|b| *b == 0)
        .filter(|raw| !raw.is_empty())
        .filter_map(|raw| std::str::from_utf8(raw).ok())
        .filter_map(|rel| {
            let abs = root.join(rel);
            // Deleted but still staged files are listed too.
            let meta = fs::symlink_metadata(&abs).ok()?;
            if !meta.is_file() {
                return None;
            }
            policy.should_index(rel, &abs).index.then(|| (rel.to_string(), abs))
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files.dedup_by(|a, b| a.0 == b.0);
    Ok(files)
}
