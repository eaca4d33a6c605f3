use super::*;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.backend, "auto");
    assert_eq!(config.embedding.model_name, "all-MiniLM-L6-v2");
    assert_eq!(config.embedding.batch_size, 32);
    assert_eq!(config.store.backend, "lancedb");
    assert_eq!(config.store.shard_count, 4);
    assert_eq!(config.indexing.chunk_size, 1500);
    assert_eq!(config.indexing.chunk_overlap, 200);
    assert_eq!(config.search.limit, 10);
    assert!(config.pool.parallel);
    assert!(config.pool.worker_count.is_none());
    assert!(!config.verbose);
}

#[test]
fn test_validate_valid_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_unknown_backend() {
    let mut config = Config::default();
    config.embedding.backend = "quantum".to_string();
    let err = config.validate().unwrap_err();
    assert!(matches!(
        err,
        SeekError::Config(ConfigError::UnknownBackend(_))
    ));
}

#[test]
fn test_validate_explicit_backends() {
    for name in ["auto", "local", "remote", "hosted", "cpu"] {
        let mut config = Config::default();
        config.embedding.backend = name.to_string();
        assert!(config.validate().is_ok(), "backend {} should be valid", name);
    }
}

#[test]
fn test_validate_invalid_store_backend() {
    let mut config = Config::default();
    config.store.backend = "postgres".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_shard_count_bounds() {
    let mut config = Config::default();
    config.store.shard_count = 0;
    assert!(config.validate().is_err());

    config.store.shard_count = MAX_SHARDS + 1;
    assert!(config.validate().is_err());

    config.store.shard_count = MAX_SHARDS;
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_overlap_must_be_smaller_than_chunk() {
    let mut config = Config::default();
    config.indexing.chunk_size = 100;
    config.indexing.chunk_overlap = 100;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("indexing.chunk_overlap"));
}

#[test]
fn test_validate_invalid_min_score() {
    let mut config = Config::default();
    config.search.min_score = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_zero_workers() {
    let mut config = Config::default();
    config.pool.worker_count = Some(0);
    assert!(config.validate().is_err());
}

#[test]
fn test_save_and_load() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path();

    let mut config = Config::default();
    config.store.shard_count = 8;
    config.embedding.backend = "cpu".to_string();
    config.embedding.remote_url = Some("http://localhost:11434".to_string());
    config.search.min_score = 0.8;

    config.save(path).unwrap();
    let loaded = Config::from_file(path).unwrap();

    assert_eq!(loaded.store.shard_count, 8);
    assert_eq!(loaded.embedding.backend, "cpu");
    assert_eq!(
        loaded.embedding.remote_url.as_deref(),
        Some("http://localhost:11434")
    );
    assert_eq!(loaded.search.min_score, 0.8);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[store]\nshard_count = 2\n").unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.store.shard_count, 2);
    assert_eq!(config.store.backend, "lancedb");
    assert_eq!(config.indexing.chunk_size, 1500);
}

#[test]
fn test_load_nonexistent_file() {
    let result = Config::from_file(Path::new("/nonexistent/config.toml"));
    assert!(matches!(
        result.unwrap_err(),
        SeekError::Config(ConfigError::FileNotFound(_))
    ));
}

#[test]
fn test_load_invalid_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[store\nshard_count = ").unwrap();

    let result = Config::from_file(&path);
    assert!(matches!(
        result.unwrap_err(),
        SeekError::Config(ConfigError::ParseFailed(_))
    ));
}

#[test]
fn test_for_project_uses_dedicated_store() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let config_a = Config::for_project(a.path());
    let config_b = Config::for_project(b.path());
    assert_ne!(config_a.store.path, config_b.store.path);
}

#[test]
fn test_backend_choice() {
    let mut config = Config::default();
    config.embedding.backend = "cpu".to_string();
    assert_eq!(
        config.backend_choice().unwrap(),
        BackendChoice::Explicit(crate::embedding::BackendKind::Cpu)
    );
}
