use super::*;
use crate::error::{ConfigError, StoreError};
use crate::test_support::{CountingBackend, FlakyFactory};
use std::fs;
use tempfile::TempDir;

const DIM: usize = 64;

fn test_config(dir: &Path, store_backend: &str, shards: usize) -> Config {
    let mut config = Config::default();
    config.store.path = dir.join("store");
    config.store.backend = store_backend.to_string();
    config.store.shard_count = shards;
    config.embedding.backend = "cpu".to_string();
    config.embedding.cpu_dimension = DIM;
    config.search.min_score = 0.0;
    config
}

async fn ready_memory_service(dir: &Path, shards: usize) -> SearchService {
    let service = SearchService::new(test_config(dir, "memory", shards));
    service.initialize().await.unwrap();
    service
}

fn write_project(root: &Path) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(
        root.join("src/main.rs"),
        "fn main() {\n    println!(\"entry\");\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("src/util.py"),
        "def parse(text):\n    return text.split()\n",
    )
    .unwrap();
    fs::write(root.join("README.md"), "# Project\n\nHow to run it.\n").unwrap();
}

#[tokio::test]
async fn test_operations_fail_before_initialize() {
    let dir = TempDir::new().unwrap();
    let service = SearchService::new(test_config(dir.path(), "memory", 2));
    assert_eq!(service.state().await, ServiceState::Uninitialized);

    let err = service.index_file("a.rs", Some("fn a() {}".into())).await.unwrap_err();
    assert!(matches!(err, SeekError::NotInitialized(ref s) if s == "uninitialized"));
    assert!(err.is_fatal());

    let options = SearchOptions::default();
    assert!(matches!(
        service.search("anything", &options).await,
        Err(SeekError::NotInitialized(_))
    ));
    assert!(matches!(service.get_stats().await, Err(SeekError::NotInitialized(_))));
    assert!(matches!(service.clear().await, Err(SeekError::NotInitialized(_))));

    let (state, stats) = service.get_status().await;
    assert_eq!(state, ServiceState::Uninitialized);
    assert!(stats.is_none());
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let service = ready_memory_service(dir.path(), 2).await;
    assert_eq!(service.state().await, ServiceState::Ready);
    service.initialize().await.unwrap();
    assert_eq!(service.state().await, ServiceState::Ready);
    assert_eq!(
        service.backend_identity().await.as_deref(),
        Some("cpu/feature-hashing")
    );
}

#[tokio::test]
async fn test_invalid_config_leaves_service_uninitialized() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), "memory", 2);
    config.embedding.backend = "quantum".to_string();
    let service = SearchService::new(config);

    let err = service.initialize().await.unwrap_err();
    assert!(matches!(err, SeekError::Config(ConfigError::UnknownBackend(_))));
    assert_eq!(service.state().await, ServiceState::Uninitialized);
}

#[tokio::test]
async fn test_index_search_and_stats() {
    let dir = TempDir::new().unwrap();
    let service = ready_memory_service(dir.path(), 2).await;

    let written = service
        .index_file(
            "src/server.rs",
            Some("fn start_server(port: u16) {\n    listen(port);\n}\n".into()),
        )
        .await
        .unwrap();
    assert_eq!(written, 1);
    service
        .index_file("docs/guide.md", Some("# Guide\n\nRead the docs.\n".into()))
        .await
        .unwrap();

    let options = service.search_options(Some(1), None, SearchFilter::default()).unwrap();
    let outcome = service.search("start server port", &options).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].file_path, "src/server.rs");
    assert!((0.0..=1.0).contains(&outcome.results[0].similarity_score));

    let stats = service.get_stats().await.unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.shard_count, 2);
    assert!(stats.last_indexed_at.is_some());
    let languages: Vec<&str> = stats
        .language_breakdown
        .iter()
        .map(|l| l.language.as_str())
        .collect();
    assert_eq!(languages, vec!["Markdown", "Rust"]);

    let (state, status_stats) = service.get_status().await;
    assert_eq!(state, ServiceState::Ready);
    assert_eq!(status_stats.unwrap().total_files, 2);
}

#[tokio::test]
async fn test_search_filter_by_language() {
    let dir = TempDir::new().unwrap();
    let service = ready_memory_service(dir.path(), 3).await;
    service
        .index_file("a.rs", Some("fn parse_config() {}\n".into()))
        .await
        .unwrap();
    service
        .index_file("b.py", Some("def parse_config():\n    pass\n".into()))
        .await
        .unwrap();

    let filter = SearchFilter {
        languages: vec!["Python".to_string()],
        ..Default::default()
    };
    let options = service.search_options(Some(10), None, filter).unwrap();
    let outcome = service.search("parse config", &options).await.unwrap();
    let paths: Vec<&str> = outcome.results.iter().map(|r| r.file_path.as_str()).collect();
    assert_eq!(paths, vec!["b.py"]);
}

#[test]
fn test_search_options_validation() {
    let dir = TempDir::new().unwrap();
    let service = SearchService::new(test_config(dir.path(), "memory", 1));

    let defaults = service.search_options(None, None, SearchFilter::default()).unwrap();
    assert_eq!(defaults.limit, 10);
    assert_eq!(defaults.top_k_per_shard, 10);

    assert!(matches!(
        service.search_options(Some(0), None, SearchFilter::default()),
        Err(SeekError::Validation(_))
    ));
    assert!(matches!(
        service.search_options(None, Some(1.5), SearchFilter::default()),
        Err(SeekError::Validation(_))
    ));
}

#[tokio::test]
async fn test_on_file_change_routes_events() {
    let dir = TempDir::new().unwrap();
    let service = ready_memory_service(dir.path(), 2).await;
    let file = dir.path().join("watched.rs");
    let path = file.to_string_lossy().to_string();

    fs::write(&file, "fn one() {}\n").unwrap();
    assert_eq!(service.on_file_change(&path, FileChange::Added).await.unwrap(), 1);

    fs::write(&file, "fn one() {}\n\nfn two() {}\n").unwrap();
    assert_eq!(
        service.on_file_change(&path, FileChange::Modified).await.unwrap(),
        2
    );

    assert_eq!(
        service.on_file_change(&path, FileChange::Deleted).await.unwrap(),
        2
    );
    assert_eq!(service.get_stats().await.unwrap().total_chunks, 0);
}

#[tokio::test]
async fn test_index_files_through_pool() {
    let dir = TempDir::new().unwrap();
    let backend = CountingBackend::new(DIM);
    let mut config = test_config(dir.path(), "memory", 4);
    config.pool.worker_count = Some(2);
    let service = SearchService::new(config).with_backend(Arc::new(backend.clone()));
    service.initialize().await.unwrap();

    let files: Vec<FileInput> = (0..8)
        .map(|i| FileInput::with_content(format!("f{i}.rs"), format!("fn f{i}() {{}}\n")))
        .collect();
    let (tx, mut rx) = mpsc::channel(64);
    let result = service
        .index_files(files.clone(), &CancellationToken::new(), Some(tx))
        .await
        .unwrap();
    assert_eq!(result.files_indexed, 8);
    assert_eq!(result.chunks_written, 8);
    assert!(result.shard_errors.is_empty());

    let mut indexed_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ProgressEvent::FileIndexed { .. }) {
            indexed_events += 1;
        }
    }
    assert_eq!(indexed_events, 8);

    let batches = backend.batch_calls();
    let again = service
        .index_files(files, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(again.files_unchanged, 8);
    assert_eq!(backend.batch_calls(), batches);
}

#[tokio::test]
async fn test_search_reports_failed_shard() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(FlakyFactory::new([1]));
    let service = SearchService::new(test_config(dir.path(), "memory", 2))
        .with_store_factory(factory);
    service.initialize().await.unwrap();

    // Pick a path that lands on the healthy shard
    let path = (0..64)
        .map(|i| format!("ok{i}.rs"))
        .find(|p| crate::vector_db::shard_for_path(p, 2) == 0)
        .unwrap();
    service
        .index_file(&path, Some("fn healthy() {}\n".into()))
        .await
        .unwrap();

    let options = service.search_options(Some(5), None, SearchFilter::default()).unwrap();
    let outcome = service.search("healthy", &options).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.shard_errors.len(), 1);
    assert_eq!(outcome.shard_errors[0].shard_id, 1);
}

#[tokio::test]
async fn test_index_directory_removes_deleted_files() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("project");
    write_project(&project);
    let service = ready_memory_service(dir.path(), 2).await;

    let request = IndexDirectoryRequest {
        path: project.to_string_lossy().to_string(),
        include_patterns: vec![],
        exclude_patterns: vec![],
    };
    let first = service
        .index_directory(&request, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(first.files_found, 3);
    assert_eq!(first.files_indexed, 3);
    assert!(first.errors.is_empty());

    fs::remove_file(project.join("src/util.py")).unwrap();
    let second = service
        .index_directory(&request, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(second.files_found, 2);
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_unchanged, 2);
    assert_eq!(second.files_removed, 1);
    assert_eq!(service.get_stats().await.unwrap().total_files, 2);
}

#[tokio::test]
async fn test_index_directory_missing_path() {
    let dir = TempDir::new().unwrap();
    let service = ready_memory_service(dir.path(), 1).await;
    let request = IndexDirectoryRequest {
        path: dir.path().join("nope").to_string_lossy().to_string(),
        include_patterns: vec![],
        exclude_patterns: vec![],
    };
    let err = service
        .index_directory(&request, &CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SeekError::Indexing(IndexingError::DirectoryNotFound(_))
    ));
}

#[tokio::test]
async fn test_clear_empties_index() {
    let dir = TempDir::new().unwrap();
    let service = ready_memory_service(dir.path(), 2).await;
    service
        .index_file("a.rs", Some("fn main_entry() {}\n".into()))
        .await
        .unwrap();
    service.clear().await.unwrap();

    let stats = service.get_stats().await.unwrap();
    assert_eq!(stats.total_files, 0);
    assert_eq!(stats.total_chunks, 0);

    let options = service.search_options(None, Some(0.0), SearchFilter::default()).unwrap();
    assert!(service.search("main entry", &options).await.unwrap().results.is_empty());

    // The hash table was cleared too, so the same content is written again
    assert_eq!(
        service
            .index_file("a.rs", Some("fn main_entry() {}\n".into()))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_dispose_is_idempotent_and_final() {
    let dir = TempDir::new().unwrap();
    let service = ready_memory_service(dir.path(), 2).await;
    service.dispose().await;
    service.dispose().await;

    assert_eq!(service.state().await, ServiceState::Disposed);
    assert!(matches!(
        service.index_file("a.rs", Some("x".into())).await,
        Err(SeekError::Disposed)
    ));
    assert!(matches!(service.initialize().await, Err(SeekError::Disposed)));
}

#[tokio::test]
async fn test_registry_returns_one_instance_per_store() {
    let dir = TempDir::new().unwrap();
    let registry = ServiceRegistry::new();
    let config_a = test_config(&dir.path().join("a"), "memory", 1);
    let config_b = test_config(&dir.path().join("b"), "memory", 1);

    let first = registry.get_instance(config_a.clone()).unwrap();
    let again = registry.get_instance(config_a.clone()).unwrap();
    let other = registry.get_instance(config_b).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(registry.len(), 2);

    first.initialize().await.unwrap();
    first.dispose().await;
    assert!(!registry.contains(&config_a.store.path));
    assert_eq!(registry.len(), 1);

    // A fresh instance replaces the disposed one
    let fresh = registry.get_instance(config_a).unwrap();
    assert!(!Arc::ptr_eq(&first, &fresh));
    fresh.initialize().await.unwrap();

    // Disposing the stale handle again leaves the fresh one registered
    first.dispose().await;
    assert_eq!(registry.len(), 2);

    registry.dispose_all().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_registry_key_survives_store_creation() {
    let dir = TempDir::new().unwrap();
    let registry = ServiceRegistry::new();
    // Resolves to {dir}/store, which does not exist yet
    let config = test_config(&dir.path().join("x").join(".."), "lancedb", 2);
    assert!(!dir.path().join("store").exists());

    let first = registry.get_instance(config.clone()).unwrap();
    first.initialize().await.unwrap();
    assert!(dir.path().join("store").exists());

    let again = registry.get_instance(config).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(registry.len(), 1);
    assert_eq!(again.state().await, ServiceState::Ready);

    registry.dispose_all().await;
}

#[tokio::test]
async fn test_registry_remove_instance() {
    let dir = TempDir::new().unwrap();
    let registry = ServiceRegistry::new();
    let config = test_config(dir.path(), "memory", 1);
    let service = registry.get_instance(config.clone()).unwrap();

    let removed = registry.remove_instance(&config.store.path).unwrap();
    assert!(Arc::ptr_eq(&service, &removed));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_persistent_store_reopens_incrementally() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), "lancedb", 2);
    let content = "fn persisted() {\n    keep();\n}\n";

    let service = SearchService::new(config.clone());
    service.initialize().await.unwrap();
    assert_eq!(service.index_file("p.rs", Some(content.into())).await.unwrap(), 1);
    service.dispose().await;

    let reopened = SearchService::new(config);
    reopened.initialize().await.unwrap();
    assert_eq!(reopened.index_file("p.rs", Some(content.into())).await.unwrap(), 0);
    assert_eq!(reopened.get_stats().await.unwrap().total_chunks, 1);
    reopened.dispose().await;
}

#[tokio::test]
async fn test_store_lock_excludes_second_service() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), "lancedb", 1);

    let owner = SearchService::new(config.clone());
    owner.initialize().await.unwrap();

    let intruder = SearchService::new(config.clone());
    let err = intruder.initialize().await.unwrap_err();
    assert!(matches!(err, SeekError::Store(StoreError::Locked(_))));
    assert_eq!(intruder.state().await, ServiceState::Uninitialized);

    owner.dispose().await;
    intruder.initialize().await.unwrap();
    intruder.dispose().await;
}

#[tokio::test]
async fn test_backend_switch_requires_rebuild() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), "lancedb", 1);
    let service = SearchService::new(config.clone());
    service.initialize().await.unwrap();
    service.dispose().await;

    let mut switched = config.clone();
    switched.embedding.cpu_dimension = 32;
    let err = SearchService::new(switched.clone())
        .initialize()
        .await
        .unwrap_err();
    assert!(matches!(err, SeekError::Config(ConfigError::StoreMismatch { .. })));

    SearchService::purge_store(&config.store.path).unwrap();
    let rebuilt = SearchService::new(switched);
    rebuilt.initialize().await.unwrap();
    rebuilt.dispose().await;
}
