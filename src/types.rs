use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Location and language of a matched chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultMetadata {
    /// First line of the chunk (1-based)
    pub start_line: usize,
    /// Last line of the chunk (1-based, inclusive)
    pub end_line: usize,
    /// Detected language
    pub language: String,
    /// Function, class or section name when the chunker found one
    pub function_name: Option<String>,
}

/// A single search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    /// Path of the indexed file
    pub file_path: String,
    /// Position of the chunk within its file
    pub chunk_index: usize,
    /// The chunk content
    pub content: String,
    /// Similarity score (0.0 to 1.0, higher is better)
    pub similarity_score: f32,
    /// Shard holding the chunk
    pub shard_id: usize,
    pub metadata: ResultMetadata,
}

/// A failure confined to one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ShardError {
    pub shard_id: usize,
    pub message: String,
}

impl ShardError {
    pub fn new(shard_id: usize, message: impl Into<String>) -> Self {
        Self {
            shard_id,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ShardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {}: {}", self.shard_id, self.message)
    }
}

/// Chunks stored for one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LanguageStats {
    pub language: String,
    pub chunk_count: usize,
}

/// Aggregate statistics, recomputed from the shard stores on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IndexStats {
    /// Distinct indexed files
    pub total_files: usize,
    /// Stored chunks across all shards
    pub total_chunks: usize,
    /// On-disk size of the store directory
    pub database_size_bytes: u64,
    /// RFC 3339 time of the most recent write, if any
    pub last_indexed_at: Option<String>,
    pub shard_count: usize,
    /// Chunk counts per language, largest first
    pub language_breakdown: Vec<LanguageStats>,
}

/// Request for `semantic_search`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SemanticSearchRequest {
    /// Natural-language description of the code to find
    pub query: String,
    /// Maximum number of matches (default: 10)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Minimum similarity score between 0.0 and 1.0 (default: 0.5)
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Only match these languages (e.g., ["Rust", "Python"])
    #[serde(default)]
    pub languages: Vec<String>,
    /// Only match these file extensions (e.g., ["rs", "py"])
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Only match files under this path prefix
    #[serde(default)]
    pub path_prefix: Option<String>,
}

/// One match returned by `semantic_search`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchMatch {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub function_name: Option<String>,
    pub language: String,
    pub similarity_score: f32,
    /// Chunk content as a fenced code block
    pub excerpt: String,
}

/// Response from `semantic_search`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SemanticSearchResponse {
    /// Matches ordered by similarity, best first
    pub matches: Vec<SearchMatch>,
    /// Shards that failed; matches from the other shards are still returned
    #[serde(default)]
    pub shard_errors: Vec<ShardError>,
    pub duration_ms: u64,
}

/// Request for `index_status`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IndexStatusRequest {}

/// Response from `index_status`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexStatusResponse {
    /// True once the engine is initialized
    pub ready: bool,
    /// Lifecycle state name
    pub state: String,
    /// Selected embedding backend, e.g. "cpu/feature-hashing"
    pub backend: Option<String>,
    pub total_files: usize,
    pub total_chunks: usize,
    pub database_size_bytes: u64,
    pub last_indexed_at: Option<String>,
    #[serde(default)]
    pub language_breakdown: Vec<LanguageStats>,
}

/// Request for `index_directory`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexDirectoryRequest {
    /// Directory to index
    pub path: String,
    /// Optional glob patterns to include (e.g., ["src/**"])
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Optional glob patterns to exclude (e.g., ["**/*.test.ts"])
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Response from `index_directory`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IndexDirectoryResponse {
    /// Eligible files found by the walk
    pub files_found: usize,
    /// Files whose chunks were (re)written
    pub files_indexed: usize,
    /// Files skipped because their content hash was unchanged
    pub files_unchanged: usize,
    /// Previously indexed files that no longer exist
    pub files_removed: usize,
    pub chunks_written: usize,
    /// Per-file errors; the batch continues past them
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub shard_errors: Vec<ShardError>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Request for `index_file`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexFileRequest {
    /// Path of the file
    pub path: String,
    /// File content; read from disk when omitted
    #[serde(default)]
    pub content: Option<String>,
}

/// Response from `index_file`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexFileResponse {
    pub path: String,
    /// Chunks written; 0 when the content was unchanged
    pub chunks_written: usize,
}

/// Request for `clear_index`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClearIndexRequest {}

/// Response from `clear_index`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClearIndexResponse {
    pub success: bool,
    pub message: String,
}

/// Result of a tool call that failed without a configuration or usage error
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolFailureResponse {
    pub error: String,
    /// The same call may succeed later, e.g. after a store or backend recovers
    pub retryable: bool,
}

#[cfg(test)]
mod tests;
