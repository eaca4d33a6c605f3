//! Sharded vector storage
//!
//! A store is a directory holding one physical shard per id. Files are assigned to shards by
//! [`shard_for_path`], so incremental updates always hit the same shard without a global
//! index.

pub mod lance_store;
pub mod manifest;
pub mod memory_store;

pub use lance_store::{LanceShardStore, LanceStoreFactory};
pub use manifest::StoreManifest;
pub use memory_store::{MemoryShardStore, MemoryStoreFactory};

use crate::indexer::CodeChunk;
use crate::types::{ResultMetadata, SearchResult};
use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Deterministic shard assignment
///
/// First eight bytes of SHA-256 over the path, big-endian, modulo `shard_count`. Stable across
/// runs and platforms.
pub fn shard_for_path(file_path: &str, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    let digest = Sha256::digest(file_path.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count as u64) as usize
}

/// Map a cosine similarity in `[-1, 1]` to a score in `[0, 1]`
pub fn score_from_cosine(cosine: f32) -> f32 {
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

/// Map a cosine distance (`1 - cos`, in `[0, 2]`) to the same score
pub fn score_from_distance(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// One stored chunk with its vector
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub chunk: CodeChunk,
    pub embedding: Vec<f32>,
    pub shard_id: usize,
    /// Position of the chunk within its file for this indexing pass
    pub chunk_index: usize,
    /// Unix seconds
    pub indexed_at: i64,
}

impl IndexRecord {
    /// Store key: file path plus chunk sequence number
    pub fn id(&self) -> String {
        format!("{}#{}", self.chunk.file_path, self.chunk_index)
    }

    pub fn to_search_result(&self, similarity_score: f32) -> SearchResult {
        SearchResult {
            file_path: self.chunk.file_path.clone(),
            chunk_index: self.chunk_index,
            content: self.chunk.content.clone(),
            similarity_score,
            shard_id: self.shard_id,
            metadata: ResultMetadata {
                start_line: self.chunk.start_line,
                end_line: self.chunk.end_line,
                language: self.chunk.language.clone(),
                function_name: self.chunk.function_name.clone(),
            },
        }
    }
}

/// File extension without the dot, lowercased
pub(crate) fn extension_of(file_path: &str) -> String {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Exact-match constraints applied inside a shard before ranking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilter {
    /// Allowed languages; empty means any
    #[serde(default)]
    pub languages: Vec<String>,
    /// Allowed extensions without the dot; empty means any
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Required path prefix
    #[serde(default)]
    pub path_prefix: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty() && self.extensions.is_empty() && self.path_prefix.is_none()
    }

    pub fn matches(&self, file_path: &str, language: &str) -> bool {
        if !self.languages.is_empty() && !self.languages.iter().any(|l| l == language) {
            return false;
        }
        if !self.extensions.is_empty() {
            let ext = extension_of(file_path);
            if !self
                .extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix
            && !file_path.starts_with(prefix.as_str())
        {
            return false;
        }
        true
    }

    /// SQL predicate over the `language`, `extension` and `file_path` columns
    pub fn to_sql(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if !self.languages.is_empty() {
            clauses.push(format!("language IN ({})", quote_list(&self.languages)));
        }
        if !self.extensions.is_empty() {
            let exts: Vec<String> = self
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect();
            clauses.push(format!("extension IN ({})", quote_list(&exts)));
        }
        if let Some(prefix) = &self.path_prefix {
            clauses.push(format!("starts_with(file_path, {})", quote(prefix)));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }
}

pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote(v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Contents summary of one shard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShardStats {
    pub shard_id: usize,
    /// Distinct file paths
    pub file_count: usize,
    pub chunk_count: usize,
    pub size_bytes: u64,
    /// Most recent `indexed_at` (unix seconds)
    pub last_indexed_at: Option<i64>,
    /// Chunk count per language
    pub languages: BTreeMap<String, usize>,
}

/// Persistent per-shard collection of (chunk, vector) pairs
///
/// Every record in a shard has the dimension passed to `initialize`; writes with any other
/// length are rejected. `upsert` is idempotent per record id.
#[async_trait::async_trait]
pub trait ShardStore: Send + Sync {
    fn shard_id(&self) -> usize;

    /// Create the shard if needed; fails if it already holds vectors of another size
    async fn initialize(&self, dimension: usize) -> Result<()>;

    /// Insert or replace records by id, returning the number written
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<usize>;

    /// Remove every record of a file, returning the number removed
    async fn delete_by_file(&self, file_path: &str) -> Result<usize>;

    /// Swap the record set of one file
    async fn replace_file(&self, file_path: &str, records: Vec<IndexRecord>) -> Result<usize> {
        self.delete_by_file(file_path).await?;
        self.upsert(records).await
    }

    /// Nearest records by cosine similarity, best first
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>>;

    async fn stats(&self) -> Result<ShardStats>;

    /// Remove all records, keeping the shard usable
    async fn clear(&self) -> Result<()>;

    async fn dispose(&self) {}
}

/// Opens shard stores by id
///
/// Worker units open their own handles through the factory, so a factory must be cheap to
/// share across threads.
#[async_trait::async_trait]
pub trait ShardStoreFactory: Send + Sync {
    /// Open and initialize one shard
    async fn open(&self, shard_id: usize, dimension: usize) -> Result<Arc<dyn ShardStore>>;

    /// Whether data survives the process
    fn persistent(&self) -> bool;

    /// Short name recorded in logs
    fn name(&self) -> &'static str;
}
