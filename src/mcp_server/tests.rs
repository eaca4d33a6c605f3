use super::*;
use std::fs;
use tempfile::TempDir;

fn memory_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.store.path = dir.join("store");
    config.store.backend = "memory".to_string();
    config.store.shard_count = 2;
    config.embedding.backend = "cpu".to_string();
    config.embedding.cpu_dimension = 64;
    config
}

async fn ready_server(dir: &Path) -> CodeSeekMcpServer {
    let registry = ServiceRegistry::new();
    CodeSeekMcpServer::new(memory_config(dir), &registry)
        .await
        .unwrap()
}

fn search_request(query: &str) -> SemanticSearchRequest {
    SemanticSearchRequest {
        query: query.to_string(),
        limit: Some(3),
        threshold: Some(0.0),
        languages: vec![],
        extensions: vec![],
        path_prefix: None,
    }
}

#[tokio::test]
async fn test_get_info() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    let info = server.get_info();

    assert_eq!(info.server_info.name, "codeseek");
    assert!(info.server_info.title.is_some());
    assert!(info.instructions.is_some());
    assert!(info.capabilities.tools.is_some());
    assert!(info.capabilities.prompts.is_some());
}

#[test]
fn test_fence_tag() {
    assert_eq!(fence_tag("Rust"), "rust");
    assert_eq!(fence_tag("TypeScript (TSX)"), "tsx");
    assert_eq!(fence_tag("C/C++ Header"), "cpp");
    assert_eq!(fence_tag("C#"), "csharp");
    assert_eq!(fence_tag("Org Mode"), "orgmode");
    assert_eq!(fence_tag("Text"), "");
}

#[tokio::test]
async fn test_search_returns_fenced_excerpt() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    server
        .run_index_file(IndexFileRequest {
            path: "src/lib.rs".to_string(),
            content: Some("pub fn open_database(path: &str) {\n    connect(path);\n}\n".into()),
        })
        .await
        .unwrap();

    let response = server
        .run_semantic_search(search_request("open database"))
        .await
        .unwrap();
    assert_eq!(response.matches.len(), 1);
    let hit = &response.matches[0];
    assert_eq!(hit.file_path, "src/lib.rs");
    assert_eq!(hit.start_line, 1);
    assert_eq!(hit.end_line, 3);
    assert_eq!(hit.function_name.as_deref(), Some("open_database"));
    assert!(hit.excerpt.starts_with("```rust\npub fn open_database"));
    assert!(hit.excerpt.ends_with("}\n```"));
}

#[tokio::test]
async fn test_search_tool_serializes_json() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    let json = server
        .semantic_search(Parameters(search_request("anything")))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["matches"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_tool_rejects_empty_query() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    let err = server
        .semantic_search(Parameters(search_request("  ")))
        .await
        .unwrap_err();
    assert!(err.contains("Empty query"));
}

#[tokio::test]
async fn test_index_file_reads_from_disk() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    let file = dir.path().join("tool.py");
    fs::write(&file, "def run():\n    return 1\n").unwrap();

    let response = server
        .run_index_file(IndexFileRequest {
            path: file.to_string_lossy().to_string(),
            content: None,
        })
        .await
        .unwrap();
    assert_eq!(response.chunks_written, 1);
    assert!(Path::new(&response.path).is_absolute());
}

#[tokio::test]
async fn test_unreadable_file_is_reported_in_result() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    let missing = dir.path().join("gone.rs");

    let json = server
        .index_file(Parameters(IndexFileRequest {
            path: missing.to_string_lossy().to_string(),
            content: None,
        }))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["error"].as_str().unwrap().contains("gone.rs"));
    assert_eq!(value["retryable"], false);
}

#[tokio::test]
async fn test_index_status_reports_counts() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    server
        .run_index_file(IndexFileRequest {
            path: "a.go".to_string(),
            content: Some("package main\n\nfunc main() {}\n".into()),
        })
        .await
        .unwrap();

    let status = server.run_index_status().await;
    assert!(status.ready);
    assert_eq!(status.state, "ready");
    assert_eq!(status.backend.as_deref(), Some("cpu/feature-hashing"));
    assert_eq!(status.total_files, 1);
    assert!(status.total_chunks >= 1);
    assert!(status.last_indexed_at.is_some());
}

#[tokio::test]
async fn test_index_status_before_ready() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(SearchService::new(memory_config(dir.path())));
    let server = CodeSeekMcpServer::with_service(service);

    let status = server.run_index_status().await;
    assert!(!status.ready);
    assert_eq!(status.state, "uninitialized");
    assert_eq!(status.total_files, 0);
    assert!(status.backend.is_none());
}

#[tokio::test]
async fn test_index_directory_with_progress() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("one.rs"), "fn one() {}\n").unwrap();
    fs::write(project.join("two.rs"), "fn two() {}\n").unwrap();
    let server = ready_server(dir.path()).await;

    let (tx, mut rx) = mpsc::channel(64);
    let response = server
        .run_index_directory(
            IndexDirectoryRequest {
                path: project.to_string_lossy().to_string(),
                include_patterns: vec![],
                exclude_patterns: vec![],
            },
            Some(tx),
        )
        .await
        .unwrap();
    assert_eq!(response.files_found, 2);
    assert_eq!(response.files_indexed, 2);
    assert_eq!(response.chunks_written, 2);

    let mut events = 0;
    while rx.recv().await.is_some() {
        events += 1;
    }
    assert!(events >= 2);
}

#[tokio::test]
async fn test_clear_index() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    server
        .run_index_file(IndexFileRequest {
            path: "x.rs".to_string(),
            content: Some("fn x() {}\n".into()),
        })
        .await
        .unwrap();

    let response = server.run_clear_index().await.unwrap();
    assert!(response.success);
    assert_eq!(server.run_index_status().await.total_chunks, 0);
}

#[tokio::test]
async fn test_shutdown_disposes_service() {
    let dir = TempDir::new().unwrap();
    let server = ready_server(dir.path()).await;
    server.shutdown().await;

    assert_eq!(server.service().state().await, ServiceState::Disposed);
    let err = server
        .clear_index(Parameters(ClearIndexRequest {}))
        .await
        .unwrap_err();
    assert!(err.contains("disposed"));
}
