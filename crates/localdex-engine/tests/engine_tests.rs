use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use localdex_core::config::{EnginePreference, Settings, VectorBackend};
use localdex_core::error::{Error, ResourceKind};
use localdex_core::types::{LexicalEngineKind, Modality, SearchMode};
use localdex_embed::EmbedderSet;
use localdex_engine::{GroundTruth, OpenOptions, Progress, ProjectIndex, ResourceProbe, UpdateOutcome};
use tempfile::TempDir;

/// Reports a full disk until switched off.
#[derive(Default)]
struct SwitchProbe {
    disk_full: AtomicBool,
}

impl ResourceProbe for SwitchProbe {
    fn free_disk_bytes(&self, _path: &Path) -> Option<u64> {
        if self.disk_full.load(Ordering::SeqCst) {
            Some(0)
        } else {
            Some(u64::MAX)
        }
    }

    fn memory_used_percent(&self) -> Option<f32> {
        Some(10.0)
    }
}

fn settings() -> Settings {
    let mut s = Settings::default();
    s.vector_backend = VectorBackend::Memory;
    s.lexical_engine = EnginePreference::Builtin;
    s
}

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::create_dir_all(dir.join("docs")).unwrap();
    fs::create_dir_all(dir.join("node_modules/dep")).unwrap();
    fs::write(dir.join("src/lib.rs"), "pub fn add(a: i32, b: i32) -> i32 {\n    a + b // zebracorn\n}\n").unwrap();
    fs::write(dir.join("src/util.rs"), "pub fn clamp_width(w: usize) -> usize {\n    w.min(80)\n}\n").unwrap();
    fs::write(dir.join("docs/guide.md"), "# Guide\n\nInstall the quokkatool first.\n").unwrap();
    fs::write(dir.join("node_modules/dep/index.js"), "module.exports = 'zebracorn';\n").unwrap();
    tmp
}

async fn open(project: &Path, data: &Path, settings: Settings, probe: Arc<dyn ResourceProbe>) -> ProjectIndex {
    ProjectIndex::open_with(
        project,
        OpenOptions {
            data_root: Some(data.to_path_buf()),
            settings: Some(settings),
            embedders: Some(EmbedderSet::hashed()),
            probe: Some(probe),
        },
    )
    .await
    .unwrap()
}

async fn open_default(project: &Path, data: &Path) -> ProjectIndex {
    open(project, data, settings(), Arc::new(SwitchProbe::default())).await
}

async fn paths(index: &ProjectIndex, query: &str, mode: SearchMode) -> Vec<String> {
    let mut out: Vec<String> =
        index.search(query, 10, mode, None).await.unwrap().into_iter().map(|r| r.path).collect();
    out.sort();
    out.dedup();
    out
}

#[tokio::test]
async fn full_index_twice_writes_nothing_new() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open_default(proj.path(), data.path()).await;

    let calls = AtomicUsize::new(0);
    let progress = |p: &Progress| {
        assert!(p.done <= p.total);
        calls.fetch_add(1, Ordering::SeqCst);
    };
    let first = index.create_full_index(Some(&progress)).await.unwrap();
    assert_eq!(first.files_indexed, 3);
    assert!(first.chunks_created >= 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let fingerprints = index.engine().fingerprints().await;
    assert!(!fingerprints.contains_key("node_modules/dep/index.js"));

    let second = index.create_full_index(None).await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.chunks_created, 0);
    assert_eq!(second.files_total, 3);
    assert_eq!(index.engine().fingerprints().await, fingerprints);

    let status = index.status().await.unwrap();
    assert!(status.exists);
    assert_eq!(status.files_indexed, 3);
    assert_eq!(status.engine_selection.unwrap().engine, LexicalEngineKind::Builtin);
    assert!(status.last_indexed_at.is_some());
    assert!(index.engine().layout().config_path().exists());
}

#[tokio::test]
async fn edits_and_deletions_reach_both_stores() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open_default(proj.path(), data.path()).await;
    index.create_full_index(None).await.unwrap();
    assert_eq!(paths(&index, "zebracorn", SearchMode::Lexical).await, vec!["src/lib.rs"]);

    fs::write(proj.path().join("src/lib.rs"), "pub fn add(a: i32, b: i32) -> i32 {\n    a + b // okapiform\n}\n").unwrap();
    fs::remove_file(proj.path().join("docs/guide.md")).unwrap();
    let report = index.create_full_index(None).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_removed, 1);
    assert_eq!(report.files_total, 2);

    assert!(paths(&index, "zebracorn", SearchMode::Lexical).await.is_empty());
    assert_eq!(paths(&index, "okapiform", SearchMode::Lexical).await, vec!["src/lib.rs"]);
    assert!(paths(&index, "quokkatool", SearchMode::Lexical).await.is_empty());
    let (lexical, vectors) = index.engine().stored_paths().await.unwrap();
    assert!(!lexical.contains("docs/guide.md"));
    assert!(!vectors.contains("docs/guide.md"));
}

#[tokio::test]
async fn search_modes_and_arguments() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open_default(proj.path(), data.path()).await;
    index.create_full_index(None).await.unwrap();

    assert_eq!(paths(&index, "quokkatool", SearchMode::Hybrid).await.first().map(String::as_str), Some("docs/guide.md"));
    let vector = index.search("clamp_width", 2, SearchMode::Vector, None).await.unwrap();
    assert_eq!(vector.len(), 2);
    assert!(vector.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    let hybrid = index.search("zebracorn", 3, SearchMode::Hybrid, Some(0.0)).await.unwrap();
    assert_eq!(hybrid[0].path, "src/lib.rs");
    assert!(hybrid.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hybrid[0].start_line >= 1);

    assert!(index.search("   ", 5, SearchMode::Hybrid, None).await.unwrap().is_empty());
    assert!(matches!(
        index.search("add", 5, SearchMode::Hybrid, Some(1.5)).await,
        Err(Error::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn single_file_updates() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open_default(proj.path(), data.path()).await;
    index.create_full_index(None).await.unwrap();

    fs::write(proj.path().join("src/new.rs"), "fn wombatize() {}\n").unwrap();
    assert!(matches!(index.update_file("src/new.rs").await.unwrap(), UpdateOutcome::Indexed { chunks: 1 }));
    assert_eq!(index.update_file("src/new.rs").await.unwrap(), UpdateOutcome::Unchanged);
    assert_eq!(paths(&index, "wombatize", SearchMode::Lexical).await, vec!["src/new.rs"]);

    assert!(matches!(
        index.update_file("node_modules/dep/index.js").await,
        Err(Error::PolicyRejected { .. })
    ));
    assert!(matches!(index.update_file("../elsewhere.rs").await, Err(Error::OutsideProject(_))));

    fs::remove_file(proj.path().join("src/new.rs")).unwrap();
    assert_eq!(index.update_file("src/new.rs").await.unwrap(), UpdateOutcome::Removed);
    assert!(paths(&index, "wombatize", SearchMode::Lexical).await.is_empty());

    assert!(index.remove_file("src/util.rs").await.unwrap());
    assert!(!index.remove_file("src/util.rs").await.unwrap());
    assert_eq!(index.status().await.unwrap().files_indexed, 2);
}

#[cfg(unix)]
#[tokio::test]
async fn files_behind_a_symlinked_directory_are_refused() {
    let proj = project();
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("secret.rs"), "fn platypus_secret() {}\n").unwrap();
    std::os::unix::fs::symlink(outside.path(), proj.path().join("linkdir")).unwrap();
    let data = TempDir::new().unwrap();
    let index = open_default(proj.path(), data.path()).await;

    assert_eq!(index.create_full_index(None).await.unwrap().files_total, 3);
    assert!(matches!(index.update_file("linkdir/secret.rs").await, Err(Error::Symlink(_))));
    assert!(paths(&index, "platypus_secret", SearchMode::Lexical).await.is_empty());
    assert!(!index.engine().fingerprints().await.contains_key("linkdir/secret.rs"));
}

#[tokio::test]
async fn include_patterns_never_override_deny_rules() {
    let proj = project();
    fs::write(proj.path().join(".env"), "SECRET=zebracorn\n").unwrap();
    let data = TempDir::new().unwrap();
    let mut s = settings();
    s.include = vec!["**/*".into(), "node_modules/**".into(), ".env".into()];
    let index = open(proj.path(), data.path(), s, Arc::new(SwitchProbe::default())).await;
    index.create_full_index(None).await.unwrap();

    let fingerprints = index.engine().fingerprints().await;
    assert!(fingerprints.contains_key("src/lib.rs"));
    assert!(!fingerprints.contains_key("node_modules/dep/index.js"));
    assert!(!fingerprints.contains_key(".env"));
    assert_eq!(paths(&index, "zebracorn", SearchMode::Lexical).await, vec!["src/lib.rs"]);
}

#[tokio::test]
async fn concurrent_full_index_is_refused() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open_default(proj.path(), data.path()).await;

    let (a, b) = tokio::join!(index.create_full_index(None), index.create_full_index(None));
    assert!(a.is_ok());
    let err = b.unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
    assert!(err.recommended_action().is_some());
}

#[tokio::test]
async fn resource_abort_keeps_completed_files() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let probe = Arc::new(SwitchProbe::default());
    probe.disk_full.store(true, Ordering::SeqCst);
    let mut s = settings();
    s.resources.check_every_files = 1;
    let index = open(proj.path(), data.path(), s, probe.clone()).await;

    let err = index.create_full_index(None).await.unwrap_err();
    assert!(matches!(err, Error::Resource { kind: ResourceKind::Disk, .. }));
    assert!(!err.user_message().contains(&proj.path().display().to_string()));
    assert_eq!(index.status().await.unwrap().files_indexed, 1);

    probe.disk_full.store(false, Ordering::SeqCst);
    let report = index.create_full_index(None).await.unwrap();
    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.files_total, 3);
}

#[tokio::test]
async fn file_count_ceiling_aborts_before_writing() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let mut s = settings();
    s.max_files = 2;
    let index = open(proj.path(), data.path(), s, Arc::new(SwitchProbe::default())).await;
    let err = index.create_full_index(None).await.unwrap_err();
    assert!(matches!(err, Error::Resource { kind: ResourceKind::FileCount, .. }));
    assert_eq!(index.status().await.unwrap().files_indexed, 0);
}

#[tokio::test]
async fn delete_keeps_config_and_reports_missing_index() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open_default(proj.path(), data.path()).await;
    assert!(matches!(index.delete_index().await, Err(Error::NotFound(_))));

    index.create_full_index(None).await.unwrap();
    index.delete_index().await.unwrap();
    let status = index.status().await.unwrap();
    assert!(!status.exists);
    assert_eq!(status.files_indexed, 0);
    assert!(index.engine().layout().config_path().exists());
    assert!(!index.engine().layout().metadata_path().exists());
    assert!(paths(&index, "zebracorn", SearchMode::Lexical).await.is_empty());
    assert!(matches!(index.delete_index().await, Err(Error::NotFound(_))));

    let report = index.create_full_index(None).await.unwrap();
    assert_eq!(report.files_indexed, 3);
}

#[tokio::test]
async fn changed_engine_preference_rebuilds_lexical_store() {
    let proj = project();
    let data = TempDir::new().unwrap();
    {
        let index = open_default(proj.path(), data.path()).await;
        index.create_full_index(None).await.unwrap();
        index.shutdown().await.unwrap();
    }
    let mut s = settings();
    s.lexical_engine = EnginePreference::Auto;
    let index = open(proj.path(), data.path(), s, Arc::new(SwitchProbe::default())).await;
    let report = index.create_full_index(None).await.unwrap();
    assert_eq!(report.files_indexed, 3);

    let selection = index.status().await.unwrap().engine_selection.unwrap();
    assert_eq!(selection.engine, LexicalEngineKind::Builtin);
    assert_eq!(selection.preference.as_deref(), Some("auto"));
    assert!(selection.reason.contains("below the native threshold"));
    assert_eq!(paths(&index, "zebracorn", SearchMode::Lexical).await, vec!["src/lib.rs"]);
    assert_eq!(index.create_full_index(None).await.unwrap().files_indexed, 0);
}

#[tokio::test]
async fn integrity_finds_and_heals_drift() {
    let proj = project();
    let data = TempDir::new().unwrap();
    {
        let index = open_default(proj.path(), data.path()).await;
        index.create_full_index(None).await.unwrap();
        index.shutdown().await.unwrap();
        let layout = index.engine().layout();
        // Code fingerprints lost, and the prose vectors with them.
        fs::remove_file(layout.fingerprints_path(Modality::Code)).unwrap();
        fs::remove_dir_all(layout.vectors_dir(Modality::Prose)).unwrap();
    }
    fs::remove_file(proj.path().join("src/lib.rs")).unwrap();

    let index = open_default(proj.path(), data.path()).await;
    let drift = index.detect_drift(GroundTruth::Disk).await.unwrap();
    assert_eq!(drift.added, vec!["src/util.rs"]);
    assert!(drift.modified.is_empty());
    assert!(drift.removed.is_empty());
    assert_eq!(drift.orphaned, vec!["src/lib.rs"]);
    assert_eq!(drift.missing, vec!["docs/guide.md"]);

    let (_, counts) = index.repair(GroundTruth::Disk).await.unwrap();
    assert_eq!(counts.removed, 1);
    assert_eq!(counts.reindexed, 2);
    assert!(index.detect_drift(GroundTruth::Disk).await.unwrap().is_clean());
    assert!(paths(&index, "zebracorn", SearchMode::Lexical).await.is_empty());
    assert!(paths(&index, "quokkatool", SearchMode::Vector).await.contains(&"docs/guide.md".to_string()));
}
