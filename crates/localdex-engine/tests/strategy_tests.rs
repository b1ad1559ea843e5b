use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use localdex_core::config::{EnginePreference, Settings, StrategyName, VectorBackend};
use localdex_core::error::Error;
use localdex_core::types::SearchMode;
use localdex_embed::EmbedderSet;
use localdex_engine::{FileEvent, OpenOptions, ProjectIndex, ResourceProbe};
use tempfile::TempDir;

struct Plenty;

impl ResourceProbe for Plenty {
    fn free_disk_bytes(&self, _path: &Path) -> Option<u64> {
        None
    }

    fn memory_used_percent(&self) -> Option<f32> {
        None
    }
}

fn settings() -> Settings {
    let mut s = Settings::default();
    s.vector_backend = VectorBackend::Memory;
    s.lexical_engine = EnginePreference::Builtin;
    s.lazy_idle_ms = 600_000;
    s.realtime_debounce_ms = 20;
    s.git_debounce_ms = 600_000;
    s
}

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::write(tmp.path().join("src/lib.rs"), "pub fn start() {}\n").unwrap();
    tmp
}

async fn open(project: &Path, data: &Path, settings: Settings) -> ProjectIndex {
    let options = OpenOptions {
        data_root: Some(data.to_path_buf()),
        settings: Some(settings),
        embedders: Some(EmbedderSet::hashed()),
        probe: Some(Arc::new(Plenty)),
    };
    ProjectIndex::open_with(project, options).await.unwrap()
}

async fn lexical_hits(index: &ProjectIndex, query: &str) -> Vec<String> {
    index.search(query, 20, SearchMode::Lexical, None).await.unwrap().into_iter().map(|r| r.path).collect()
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn lazy_coalesces_repeated_changes_into_one_chunk_set() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open(proj.path(), data.path(), settings()).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Lazy)).await.unwrap();
    let chunks_before = index.status().await.unwrap().chunks_indexed;

    for n in 1..=5 {
        fs::write(proj.path().join("src/lib.rs"), format!("pub fn start() {{}} // revision{n}\n")).unwrap();
        index.dispatch(FileEvent::modified("src/lib.rs")).await.unwrap();
    }
    let status = index.status().await.unwrap();
    assert_eq!(status.pending_files, 1);
    assert_eq!(status.strategy, StrategyName::Lazy);

    // The query flushes first.
    assert_eq!(lexical_hits(&index, "revision5").await, vec!["src/lib.rs"]);
    assert!(lexical_hits(&index, "revision4").await.is_empty());
    let status = index.status().await.unwrap();
    assert_eq!(status.pending_files, 0);
    assert_eq!(status.chunks_indexed, chunks_before);
}

#[tokio::test]
async fn lazy_applies_deletions_and_latest_mark_wins() {
    let proj = project();
    fs::write(proj.path().join("src/gone.rs"), "fn vanishing_act() {}\n").unwrap();
    let data = TempDir::new().unwrap();
    let index = open(proj.path(), data.path(), settings()).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Lazy)).await.unwrap();

    fs::remove_file(proj.path().join("src/gone.rs")).unwrap();
    index.dispatch(FileEvent::deleted("src/gone.rs")).await.unwrap();
    index.dispatch(FileEvent::deleted("src/lib.rs")).await.unwrap();
    fs::write(proj.path().join("src/lib.rs"), "pub fn start() {} // phoenixed\n").unwrap();
    index.dispatch(FileEvent::modified("src/lib.rs")).await.unwrap();
    assert_eq!(index.status().await.unwrap().pending_files, 2);

    index.flush().await.unwrap();
    assert!(lexical_hits(&index, "vanishing_act").await.is_empty());
    assert_eq!(lexical_hits(&index, "phoenixed").await, vec!["src/lib.rs"]);
    let stats = index.status().await.unwrap().strategy_stats.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn lazy_pending_work_survives_restart() {
    let proj = project();
    let data = TempDir::new().unwrap();
    {
        let index = open(proj.path(), data.path(), settings()).await;
        index.create_full_index(None).await.unwrap();
        index.start(Some(StrategyName::Lazy)).await.unwrap();
        fs::write(proj.path().join("src/lib.rs"), "pub fn start() {} // persisted\n").unwrap();
        index.dispatch(FileEvent::modified("src/lib.rs")).await.unwrap();
    }

    let index = open(proj.path(), data.path(), settings()).await;
    assert_eq!(index.status().await.unwrap().pending_files, 1);
    index.start(Some(StrategyName::Lazy)).await.unwrap();
    index.flush().await.unwrap();
    assert_eq!(lexical_hits(&index, "persisted").await, vec!["src/lib.rs"]);
}

#[tokio::test]
async fn switching_from_lazy_flushes_pending_files() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open(proj.path(), data.path(), settings()).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Lazy)).await.unwrap();

    fs::write(proj.path().join("src/new.rs"), "fn handed_over() {}\n").unwrap();
    index.dispatch(FileEvent::modified("src/new.rs")).await.unwrap();
    index.set_strategy(StrategyName::Realtime).await.unwrap();

    let status = index.status().await.unwrap();
    assert_eq!(status.strategy, StrategyName::Realtime);
    assert_eq!(status.pending_files, 0);
    // Realtime never flushes before a query, so this proves the switch did.
    assert_eq!(lexical_hits(&index, "handed_over").await, vec!["src/new.rs"]);

    // Same strategy again changes nothing.
    index.set_strategy(StrategyName::Realtime).await.unwrap();
    assert!(index.orchestrator().active().await.unwrap().is_active());
}

#[tokio::test]
async fn realtime_applies_changes_after_the_debounce_window() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open(proj.path(), data.path(), settings()).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Realtime)).await.unwrap();

    fs::write(proj.path().join("src/live.rs"), "fn streamed_in() {}\n").unwrap();
    index.dispatch(FileEvent::modified("src/live.rs")).await.unwrap();
    index.dispatch(FileEvent::modified("src/live.rs")).await.unwrap();
    let idx = &index;
    eventually(move || async move { lexical_hits(idx, "streamed_in").await == vec!["src/live.rs".to_string()] }).await;

    fs::remove_file(proj.path().join("src/live.rs")).unwrap();
    index.dispatch(FileEvent::deleted("src/live.rs")).await.unwrap();
    eventually(move || async move { lexical_hits(idx, "streamed_in").await.is_empty() }).await;

    index.shutdown().await.unwrap();
    assert!(index.orchestrator().active().await.is_none());
}

#[tokio::test]
async fn realtime_stop_applies_armed_timers() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let mut s = settings();
    s.realtime_debounce_ms = 600_000;
    let index = open(proj.path(), data.path(), s).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Realtime)).await.unwrap();

    fs::write(proj.path().join("src/late.rs"), "fn not_forgotten() {}\n").unwrap();
    index.dispatch(FileEvent::modified("src/late.rs")).await.unwrap();
    assert_eq!(index.status().await.unwrap().pending_files, 1);

    index.set_strategy(StrategyName::Lazy).await.unwrap();
    assert_eq!(lexical_hits(&index, "not_forgotten").await, vec!["src/late.rs"]);
}

#[tokio::test]
async fn git_strategy_requires_a_repository() {
    let proj = project();
    let data = TempDir::new().unwrap();
    let index = open(proj.path(), data.path(), settings()).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Lazy)).await.unwrap();

    let err = index.set_strategy(StrategyName::Git).await.unwrap_err();
    assert!(matches!(err, Error::NotVersioned(_)));
    assert_eq!(index.orchestrator().active_name().await, Some(StrategyName::Lazy));
}

#[tokio::test]
async fn git_flush_reconciles_against_the_project() {
    let proj = project();
    fs::create_dir_all(proj.path().join(".git")).unwrap();
    let data = TempDir::new().unwrap();
    let index = open(proj.path(), data.path(), settings()).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Git)).await.unwrap();

    fs::write(proj.path().join("src/checked_out.rs"), "fn from_another_branch() {}\n").unwrap();
    fs::remove_file(proj.path().join("src/lib.rs")).unwrap();
    // Single file events are not acted on.
    index.dispatch(FileEvent::modified("src/checked_out.rs")).await.unwrap();
    assert!(lexical_hits(&index, "from_another_branch").await.is_empty());

    index.flush().await.unwrap();
    assert_eq!(lexical_hits(&index, "from_another_branch").await, vec!["src/checked_out.rs"]);
    let fingerprints = index.engine().fingerprints().await;
    assert!(!fingerprints.contains_key("src/lib.rs"));
    assert_eq!(index.status().await.unwrap().strategy, StrategyName::Git);
}

#[tokio::test]
async fn git_history_moves_trigger_a_debounced_repair() {
    let proj = project();
    fs::create_dir_all(proj.path().join(".git/logs")).unwrap();
    fs::write(proj.path().join(".git/logs/HEAD"), "0000 1111 commit (initial): start\n").unwrap();
    let data = TempDir::new().unwrap();
    let mut s = settings();
    s.git_debounce_ms = 50;
    let index = open(proj.path(), data.path(), s).await;
    index.create_full_index(None).await.unwrap();
    index.start(Some(StrategyName::Git)).await.unwrap();

    fs::write(proj.path().join("src/topic.rs"), "fn arrived_by_checkout() {}\n").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(lexical_hits(&index, "arrived_by_checkout").await.is_empty(), "plain file writes are not acted on");

    let mut log = std::fs::OpenOptions::new().append(true).open(proj.path().join(".git/logs/HEAD")).unwrap();
    writeln!(log, "1111 2222 checkout: moving from main to topic").unwrap();
    drop(log);

    let idx = &index;
    eventually(move || async move { lexical_hits(idx, "arrived_by_checkout").await == vec!["src/topic.rs".to_string()] })
        .await;
    eventually(move || async move { idx.status().await.unwrap().strategy_stats.unwrap().processed >= 1 }).await;
    assert_eq!(index.status().await.unwrap().strategy_stats.unwrap().failed, 0);
}
