use super::*;
use crate::cache::{FileHashTable, content_hash};
use crate::indexer::{CodeChunk, FileInput, Indexer};
use crate::test_support::{CountingBackend, FlakyFactory, open_shards};
use crate::vector_db::{IndexRecord, MemoryStoreFactory, shard_for_path};

const DIM: usize = 3;

fn record(path: &str, shard_id: usize, embedding: Vec<f32>) -> IndexRecord {
    IndexRecord {
        chunk: CodeChunk {
            file_path: path.to_string(),
            start_line: 1,
            end_line: 2,
            content: format!("// {path}"),
            language: "Rust".to_string(),
            function_name: None,
            content_hash: "h".to_string(),
        },
        embedding,
        shard_id,
        chunk_index: 0,
        indexed_at: 0,
    }
}

fn pool(factory: Arc<dyn ShardStoreFactory>, backend: CountingBackend, workers: usize) -> WorkerPool {
    WorkerPool::new(
        factory,
        Arc::new(backend),
        CodeChunker::new(1000, 100),
        Some(workers),
    )
}

fn job(path: &str, content: &str, shard_id: usize) -> FileJob {
    FileJob {
        path: path.to_string(),
        content: content.to_string(),
        hash: content_hash(content),
        shard_id,
    }
}

#[test]
fn test_plan_units_round_robin() {
    assert_eq!(
        plan_units(&[0, 1, 2, 3, 4], 2),
        vec![vec![0, 2, 4], vec![1, 3]]
    );
    assert_eq!(plan_units(&[5, 9], 3), vec![vec![5], vec![9]]);
    assert_eq!(plan_units(&[3], 0), vec![vec![3]]);
    assert!(plan_units(&[], 4).is_empty());
}

#[test]
fn test_default_unit_count_bounds() {
    assert_eq!(default_unit_count(0), 1);
    assert_eq!(default_unit_count(1), 1);
    let count = default_unit_count(64);
    assert!(count >= 1 && count <= 64);
}

#[test]
fn test_unit_count_never_exceeds_shards() {
    let factory: Arc<dyn ShardStoreFactory> = Arc::new(MemoryStoreFactory::new());
    let pool = pool(factory.clone(), CountingBackend::new(DIM), 8);
    assert_eq!(pool.unit_count_for(3), 3);
    let zero = WorkerPool::new(
        factory,
        Arc::new(CountingBackend::new(DIM)),
        CodeChunker::default(),
        Some(0),
    );
    assert_eq!(zero.unit_count_for(3), 1);
}

#[tokio::test]
async fn test_global_top_k_from_unit_other_than_zero() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let stores = open_shards(factory.as_ref(), 4, DIM).await;
    stores[0]
        .upsert(vec![record("zero.rs", 0, vec![0.3, 1.0, 0.0])])
        .await
        .unwrap();
    stores[1]
        .upsert(vec![record("one.rs", 1, vec![0.0, 1.0, 0.0])])
        .await
        .unwrap();
    stores[2]
        .upsert(vec![record("two.rs", 2, vec![0.5, 1.0, 0.0])])
        .await
        .unwrap();
    // Shard 3 is served by unit 1 with two units
    stores[3]
        .upsert(vec![
            record("best.rs", 3, vec![1.0, 0.0, 0.0]),
            record("runner_up.rs", 3, vec![1.0, 0.1, 0.0]),
        ])
        .await
        .unwrap();

    let pool = pool(factory, CountingBackend::new(DIM), 2);
    let outcome = pool
        .search(
            vec![1.0, 0.0, 0.0],
            vec![0, 1, 2, 3],
            &SearchOptions {
                limit: 2,
                min_score: 0.0,
                top_k_per_shard: 1,
                filter: SearchFilter::default(),
            },
        )
        .await
        .unwrap();

    let paths: Vec<&str> = outcome.results.iter().map(|r| r.file_path.as_str()).collect();
    assert_eq!(paths, vec!["best.rs", "runner_up.rs"]);
    assert!(outcome.shard_errors.is_empty());
}

#[tokio::test]
async fn test_search_partial_failure() {
    let factory = Arc::new(FlakyFactory::new([1]));
    let healthy = factory.inner.open(0, DIM).await.unwrap();
    healthy
        .upsert(vec![record("ok.rs", 0, vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();

    let pool = pool(factory, CountingBackend::new(DIM), 2);
    let outcome = pool
        .search(vec![1.0, 0.0, 0.0], vec![0, 1], &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].file_path, "ok.rs");
    assert_eq!(outcome.shard_errors.len(), 1);
    assert_eq!(outcome.shard_errors[0].shard_id, 1);
}

#[tokio::test]
async fn test_search_all_units_failed() {
    let pool = pool(
        Arc::new(FlakyFactory::unopenable([0, 1])),
        CountingBackend::new(DIM),
        2,
    );
    let err = pool
        .search(vec![1.0, 0.0, 0.0], vec![0, 1], &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SeekError>(),
        Some(SeekError::AllShardsFailed(2))
    ));
}

#[tokio::test]
async fn test_search_without_shards() {
    let pool = pool(
        Arc::new(MemoryStoreFactory::new()),
        CountingBackend::new(DIM),
        2,
    );
    let outcome = pool
        .search(vec![1.0, 0.0, 0.0], Vec::new(), &SearchOptions::default())
        .await
        .unwrap();
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn test_index_writes_through_units() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let backend = CountingBackend::new(DIM);
    let pool = pool(factory.clone(), backend.clone(), 3);

    let mut jobs = BTreeMap::new();
    for shard_id in 0..4 {
        jobs.insert(
            shard_id,
            vec![job(
                &format!("file_{shard_id}.py"),
                "def f():\n    return 1\n",
                shard_id,
            )],
        );
    }
    let run = pool.index(jobs, CancellationToken::new(), None).await;

    assert_eq!(run.outcomes.len(), 4);
    assert!(run.shard_errors.is_empty());
    assert!(!run.cancelled);
    assert_eq!(backend.batch_calls(), 4);
    for store in open_shards(factory.as_ref(), 4, DIM).await {
        assert_eq!(store.stats().await.unwrap().chunk_count, 1);
    }
}

#[tokio::test]
async fn test_index_reports_unopenable_shard() {
    let factory = Arc::new(FlakyFactory::unopenable([1]));
    let pool = pool(factory, CountingBackend::new(DIM), 2);

    let mut jobs = BTreeMap::new();
    jobs.insert(0, vec![job("a.py", "x = 1\n", 0)]);
    jobs.insert(1, vec![job("b.py", "y = 2\n", 1)]);
    let run = pool.index(jobs, CancellationToken::new(), None).await;

    assert_eq!(run.outcomes.len(), 1);
    assert_eq!(run.shard_errors.len(), 1);
    assert_eq!(run.shard_errors[0].shard_id, 1);
    assert!(run.shard_errors[0].message.contains("permission denied"));
}

#[tokio::test]
async fn test_index_cancelled_before_start() {
    let backend = CountingBackend::new(DIM);
    let pool = pool(Arc::new(MemoryStoreFactory::new()), backend.clone(), 2);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut jobs = BTreeMap::new();
    jobs.insert(0, vec![job("a.py", "x = 1\n", 0)]);
    let run = pool.index(jobs, cancel, None).await;

    assert!(run.cancelled);
    assert!(run.outcomes.is_empty());
    assert_eq!(backend.batch_calls(), 0);
}

#[tokio::test]
async fn test_index_forwards_progress() {
    let pool = pool(
        Arc::new(MemoryStoreFactory::new()),
        CountingBackend::new(DIM),
        2,
    );
    let (tx, mut rx) = mpsc::channel(64);
    let mut jobs = BTreeMap::new();
    jobs.insert(0, vec![job("a.py", "x = 1\n", 0), job("b.py", "y = 2\n", 0)]);
    jobs.insert(1, vec![job("c.py", "z = 3\n", 1)]);
    pool.index(jobs, CancellationToken::new(), Some(tx)).await;

    let mut indexed = 0;
    let mut finished = 0;
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::FileIndexed { .. } => indexed += 1,
            ProgressEvent::ShardFinished { .. } => finished += 1,
            ProgressEvent::FileFailed { .. } => panic!("unexpected failure"),
        }
    }
    assert_eq!(indexed, 3);
    assert_eq!(finished, 2);
}

#[tokio::test]
async fn test_indexer_parallel_batch() {
    let factory = Arc::new(MemoryStoreFactory::new());
    let backend = CountingBackend::new(DIM);
    let stores = open_shards(factory.as_ref(), 4, DIM).await;
    let mut indexer = Indexer::new(
        Arc::new(backend.clone()),
        stores.clone(),
        CodeChunker::new(1000, 100),
        FileHashTable::default(),
        None,
        1024 * 1024,
    );
    let pool = pool(factory, backend.clone(), 2);

    let files: Vec<FileInput> = (0..8)
        .map(|i| FileInput::with_content(format!("src/mod_{i}.py"), format!("def f{i}():\n    return {i}\n")))
        .collect();
    let result = indexer
        .index_files_parallel(files.clone(), &pool, &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(result.files_indexed, 8);
    assert_eq!(result.chunks_written, 8);
    assert!(result.shard_errors.is_empty());
    for file in &files {
        assert!(indexer.hashes().get(&file.path).is_some());
        let shard = shard_for_path(&file.path, 4);
        assert!(stores[shard].stats().await.unwrap().chunk_count >= 1);
    }

    // Second pass is fully incremental
    let again = indexer
        .index_files_parallel(files, &pool, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(again.files_unchanged, 8);
    assert_eq!(backend.batch_calls(), 8);
}

#[tokio::test]
async fn test_indexer_parallel_shard_failure_evicts_files() {
    let factory = Arc::new(FlakyFactory::unopenable([0]));
    let backend = CountingBackend::new(DIM);
    let mut stores = Vec::new();
    for shard_id in 0..2 {
        stores.push(factory.inner.open(shard_id, DIM).await.unwrap());
    }
    let mut hashes = FileHashTable::default();
    let doomed = (0..20)
        .map(|i| format!("pkg/f{i}.py"))
        .find(|p| shard_for_path(p, 2) == 0)
        .unwrap();
    let healthy = (0..20)
        .map(|i| format!("pkg/f{i}.py"))
        .find(|p| shard_for_path(p, 2) == 1)
        .unwrap();
    hashes.insert(doomed.clone(), "old");

    let mut indexer = Indexer::new(
        Arc::new(backend.clone()),
        stores,
        CodeChunker::new(1000, 100),
        hashes,
        None,
        1024 * 1024,
    );
    let pool = pool(factory, backend, 2);
    let result = indexer
        .index_files_parallel(
            vec![
                FileInput::with_content(doomed.clone(), "a = 1\n"),
                FileInput::with_content(healthy.clone(), "b = 2\n"),
            ],
            &pool,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.files_indexed, 1);
    assert_eq!(result.files_failed, 1);
    assert_eq!(result.shard_errors.len(), 1);
    assert!(indexer.hashes().get(&doomed).is_none());
    assert!(indexer.hashes().get(&healthy).is_some());
}

#[tokio::test]
async fn test_indexer_parallel_all_shards_failed() {
    let factory = Arc::new(FlakyFactory::unopenable([0, 1]));
    let backend = CountingBackend::new(DIM);
    let stores = open_shards(&factory.inner, 2, DIM).await;
    let mut indexer = Indexer::new(
        Arc::new(backend.clone()),
        stores,
        CodeChunker::new(1000, 100),
        FileHashTable::default(),
        None,
        1024 * 1024,
    );
    let pool = pool(factory, backend, 2);
    let files: Vec<FileInput> = (0..10)
        .map(|i| FileInput::with_content(format!("f{i}.py"), "a = 1\n"))
        .collect();

    let err = indexer
        .index_files_parallel(files, &pool, &CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SeekError>(),
        Some(SeekError::AllShardsFailed(_))
    ));
}
