
use super::*;

#[test]
fn test_search_request_minimal_json() {
    let req: SemanticSearchRequest = serde_json::from_str(r#"{"query":"main entry point"}"#).unwrap();
    assert_eq!(req.query, "main entry point");
    assert!(req.limit.is_none());
    assert!(req.threshold.is_none());
    assert!(req.languages.is_empty());
    assert!(req.path_prefix.is_none());
}

#[test]
fn test_search_request_with_filters() {
    let json = r#"{
        "query": "parse config",
        "limit": 3,
        "threshold": 0.6,
        "languages": ["Rust"],
        "extensions": ["rs"],
        "path_prefix": "/repo/src"
    }"#;
    let req: SemanticSearchRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.limit, Some(3));
    assert_eq!(req.threshold, Some(0.6));
    assert_eq!(req.languages, vec!["Rust"]);
    assert_eq!(req.extensions, vec!["rs"]);
    assert_eq!(req.path_prefix.as_deref(), Some("/repo/src"));
}

#[test]
fn test_index_file_request_content_optional() {
    let req: IndexFileRequest = serde_json::from_str(r#"{"path":"src/lib.rs"}"#).unwrap();
    assert!(req.content.is_none());

    let req: IndexFileRequest =
        serde_json::from_str(r#"{"path":"src/lib.rs","content":"fn a() {}"}"#).unwrap();
    assert_eq!(req.content.as_deref(), Some("fn a() {}"));
}

#[test]
fn test_index_directory_request_defaults() {
    let req: IndexDirectoryRequest = serde_json::from_str(r#"{"path":"/repo"}"#).unwrap();
    assert!(req.include_patterns.is_empty());
    assert!(req.exclude_patterns.is_empty());
}

#[test]
fn test_index_directory_response_default() {
    let response = IndexDirectoryResponse::default();
    assert_eq!(response.files_found, 0);
    assert!(!response.cancelled);
    assert!(response.errors.is_empty());
}

#[test]
fn test_search_result_serialization() {
    let result = SearchResult {
        file_path: "src/main.rs".to_string(),
        chunk_index: 2,
        content: "fn main() {}".to_string(),
        similarity_score: 0.82,
        shard_id: 1,
        metadata: ResultMetadata {
            start_line: 10,
            end_line: 12,
            language: "Rust".to_string(),
            function_name: Some("main".to_string()),
        },
    };

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["file_path"], "src/main.rs");
    assert_eq!(json["chunk_index"], 2);
    assert_eq!(json["metadata"]["function_name"], "main");

    let back: SearchResult = serde_json::from_value(json).unwrap();
    assert_eq!(back, result);
}

#[test]
fn test_shard_error_display() {
    let err = ShardError::new(3, "table missing");
    assert_eq!(err.to_string(), "shard 3: table missing");
}

#[test]
fn test_status_response_serialization() {
    let response = IndexStatusResponse {
        ready: true,
        state: "ready".to_string(),
        backend: Some("cpu/feature-hashing".to_string()),
        total_files: 3,
        total_chunks: 7,
        database_size_bytes: 4096,
        last_indexed_at: Some("2026-01-01T00:00:00+00:00".to_string()),
        language_breakdown: vec![LanguageStats {
            language: "TypeScript".to_string(),
            chunk_count: 4,
        }],
    };
    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"ready\":true"));
    assert!(json.contains("\"total_files\":3"));
}

#[test]
fn test_request_schemas_generate() {
    let schema = schemars::schema_for!(SemanticSearchRequest);
    let json = serde_json::to_string(&schema).unwrap();
    assert!(json.contains("query"));
    assert!(json.contains("threshold"));
}
