use localdex_core::config::VectorBackend;
use localdex_core::types::Chunk;
use localdex_vector::{open_vector_store, LanceVectorStore};
use localdex_core::traits::VectorStore;

fn chunk(path: &str, idx: usize, hash: &str) -> Chunk {
    Chunk {
        id: Chunk::make_id(path, hash, idx),
        source_path: path.into(),
        text: format!("chunk {idx} of {path}"),
        start_line: idx * 10 + 1,
        end_line: idx * 10 + 12,
        content_hash: hash.into(),
    }
}

fn unit(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[axis] = 1.0;
    v
}

#[tokio::test]
async fn lance_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = LanceVectorStore::open(dir.path(), 4).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.search(&unit(4, 0), 3).await.unwrap().is_empty());

    store
        .upsert(
            &[chunk("src/a.rs", 0, "h1"), chunk("src/a.rs", 1, "h1"), chunk("docs/it's.md", 0, "h2")],
            &[unit(4, 0), unit(4, 1), unit(4, 2)],
        )
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 3);

    let hits = store.search(&unit(4, 1), 3).await.unwrap();
    assert_eq!(hits[0].chunk.id, Chunk::make_id("src/a.rs", "h1", 1));
    assert_eq!(hits[0].chunk.start_line, 11);
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));

    // Same id again replaces rather than duplicates.
    store.upsert(&[chunk("src/a.rs", 0, "h1")], &[unit(4, 3)]).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 3);

    store.remove_by_path("docs/it's.md").await.unwrap();
    let entries = store.scan().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.source_path == "src/a.rs" && e.content_hash == "h1"));
    store.close().await.unwrap();

    let reopened = open_vector_store(VectorBackend::Lance, dir.path(), 4).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);
    assert!(LanceVectorStore::open(dir.path(), 8).await.is_err());
}

#[tokio::test]
async fn memory_backend_opens_through_factory() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_vector_store(VectorBackend::Memory, dir.path(), 4).await.unwrap();
    store.upsert(&[chunk("a.rs", 0, "h")], &[unit(4, 0)]).await.unwrap();
    store.flush().await.unwrap();
    let again = open_vector_store(VectorBackend::Memory, dir.path(), 4).await.unwrap();
    assert_eq!(again.dim(), 4);
    assert_eq!(again.count().await.unwrap(), 1);
}
