//! Code indexing, file walking, and chunking strategies
//!
//! The [`Indexer`] turns files into chunks, embeds them in one batch per file and writes
//! them into the shard picked by [`shard_for_path`]. A content-hash table keeps unchanged
//! files from being embedded twice.

mod ast_parser;
mod chunker;
pub mod file_walker;
mod language;

pub use ast_parser::{AstNode, AstParser, NodeRole};
pub use chunker::CodeChunker;
pub use file_walker::FileWalker;
pub use language::{FALLBACK_LANGUAGE, detect_language, detect_language_for};

use crate::cache::{FileHashTable, content_hash};
use crate::embedding::EmbeddingBackend;
use crate::error::{IndexingError, SeekError};
use crate::types::ShardError;
use crate::vector_db::{IndexRecord, ShardStore, shard_for_path};
use crate::worker_pool::{ProgressEvent, WorkerPool};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Represents a code chunk ready for embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub file_path: String,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub language: String,
    /// Declaration or heading name when the chunk follows one
    pub function_name: Option<String>,
    /// SHA-256 of `content`
    pub content_hash: String,
}

/// A file submitted for indexing; content is read from disk when absent
#[derive(Debug, Clone)]
pub struct FileInput {
    pub path: String,
    pub content: Option<String>,
}

impl FileInput {
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    pub fn with_content(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }
}

/// A changed file, ready to be written into its shard
#[derive(Debug, Clone)]
pub struct FileJob {
    pub path: String,
    pub content: String,
    pub hash: String,
    pub shard_id: usize,
}

/// What happened to one file of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Indexed {
        path: String,
        hash: String,
        chunks: usize,
    },
    Failed {
        path: String,
        error: String,
    },
}

/// Aggregate result of a batch
#[derive(Debug, Clone, Default)]
pub struct IndexFilesResult {
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_failed: usize,
    pub chunks_written: usize,
    /// One message per failed file
    pub errors: Vec<String>,
    pub shard_errors: Vec<ShardError>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Writes files into one shard
///
/// Holds no index-wide state, so a worker unit can own one per assigned shard.
pub struct ShardWriter {
    store: Arc<dyn ShardStore>,
    backend: Arc<dyn EmbeddingBackend>,
    chunker: CodeChunker,
}

impl ShardWriter {
    pub fn new(
        store: Arc<dyn ShardStore>,
        backend: Arc<dyn EmbeddingBackend>,
        chunker: CodeChunker,
    ) -> Self {
        Self {
            store,
            backend,
            chunker,
        }
    }

    pub fn shard_id(&self) -> usize {
        self.store.shard_id()
    }

    /// Chunk, embed and replace the records of one file, returning the chunk count
    pub async fn write(&self, job: &FileJob) -> Result<usize> {
        let chunks = self.chunker.chunk(&job.content, &job.path);
        if chunks.is_empty() {
            self.store.delete_by_file(&job.path).await?;
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .backend
            .embed_batch(texts)
            .await
            .with_context(|| format!("Failed to embed {}", job.path))?;
        if embeddings.len() != chunks.len() {
            anyhow::bail!(
                "Backend returned {} vectors for {} chunks of {}",
                embeddings.len(),
                chunks.len(),
                job.path
            );
        }

        let shard_id = self.shard_id();
        let indexed_at = chrono::Utc::now().timestamp();
        let records: Vec<IndexRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (chunk, embedding))| IndexRecord {
                chunk,
                embedding,
                shard_id,
                chunk_index,
                indexed_at,
            })
            .collect();
        let count = records.len();

        self.store
            .replace_file(&job.path, records)
            .await
            .with_context(|| format!("Failed to write {} to shard {}", job.path, shard_id))?;
        Ok(count)
    }

    /// Write a file and report the outcome instead of failing
    pub async fn process(&self, job: FileJob) -> FileOutcome {
        match self.write(&job).await {
            Ok(chunks) => {
                tracing::debug!("Indexed {} ({} chunks)", job.path, chunks);
                FileOutcome::Indexed {
                    path: job.path,
                    hash: job.hash,
                    chunks,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to index {}: {:#}", job.path, e);
                FileOutcome::Failed {
                    path: job.path,
                    error: format!("{:#}", e),
                }
            }
        }
    }
}

/// Result of checking a file against the hash table
enum Prepared {
    Unchanged,
    Changed(FileJob),
}

/// Owns the shard stores and the content-hash table of one index
pub struct Indexer {
    backend: Arc<dyn EmbeddingBackend>,
    stores: Vec<Arc<dyn ShardStore>>,
    chunker: CodeChunker,
    hashes: FileHashTable,
    hash_path: Option<PathBuf>,
    max_file_size: usize,
}

impl Indexer {
    /// `stores[i]` must be the store of shard `i`
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        stores: Vec<Arc<dyn ShardStore>>,
        chunker: CodeChunker,
        hashes: FileHashTable,
        hash_path: Option<PathBuf>,
        max_file_size: usize,
    ) -> Self {
        Self {
            backend,
            stores,
            chunker,
            hashes,
            hash_path,
            max_file_size,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.stores.len()
    }

    pub fn shard_of(&self, file_path: &str) -> usize {
        shard_for_path(file_path, self.stores.len())
    }

    pub fn hashes(&self) -> &FileHashTable {
        &self.hashes
    }

    pub fn chunker(&self) -> &CodeChunker {
        &self.chunker
    }

    fn writer(&self, shard_id: usize) -> ShardWriter {
        ShardWriter::new(
            self.stores[shard_id].clone(),
            self.backend.clone(),
            self.chunker.clone(),
        )
    }

    /// Persist the hash table; failures only cost re-embedding later
    fn save_hashes(&self) {
        if let Some(path) = &self.hash_path
            && let Err(e) = self.hashes.save(path)
        {
            tracing::warn!("Failed to save hash table: {}", e);
        }
    }

    /// Content from the input or from disk; the size limit applies to both
    fn read_content(&self, input: FileInput) -> Result<(String, String), IndexingError> {
        let content = match input.content {
            Some(content) => content,
            None => {
                let bytes = std::fs::read(&input.path).map_err(|e| IndexingError::FileReadFailed {
                    file: input.path.clone(),
                    reason: e.to_string(),
                })?;
                if bytes.len() > self.max_file_size {
                    return Err(IndexingError::FileTooLarge {
                        size: bytes.len(),
                        max: self.max_file_size,
                    });
                }
                if bytes.contains(&0) {
                    return Err(IndexingError::BinaryFile(input.path));
                }
                String::from_utf8(bytes).map_err(|e| IndexingError::FileReadFailed {
                    file: input.path.clone(),
                    reason: e.to_string(),
                })?
            }
        };
        if content.len() > self.max_file_size {
            return Err(IndexingError::FileTooLarge {
                size: content.len(),
                max: self.max_file_size,
            });
        }
        Ok((input.path, content))
    }

    fn prepare(&self, input: FileInput) -> Result<Prepared, IndexingError> {
        let (path, content) = self.read_content(input)?;
        let hash = content_hash(&content);
        if self.hashes.is_unchanged(&path, &hash) {
            return Ok(Prepared::Unchanged);
        }
        let shard_id = self.shard_of(&path);
        Ok(Prepared::Changed(FileJob {
            path,
            content,
            hash,
            shard_id,
        }))
    }

    /// Read and hash a batch, dropping unchanged files
    ///
    /// Unreadable files are recorded as failures in `result`.
    pub fn plan(&self, files: Vec<FileInput>, result: &mut IndexFilesResult) -> Vec<FileJob> {
        let prepared: Vec<(String, Result<Prepared, IndexingError>)> = files
            .into_par_iter()
            .map(|input| (input.path.clone(), self.prepare(input)))
            .collect();

        let mut jobs = Vec::new();
        for (path, outcome) in prepared {
            match outcome {
                Ok(Prepared::Unchanged) => result.files_unchanged += 1,
                Ok(Prepared::Changed(job)) => jobs.push(job),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path, e);
                    result.files_failed += 1;
                    result.errors.push(format!("{}: {}", path, e));
                }
            }
        }
        jobs
    }

    /// Record a file outcome in the hash table and the batch result
    pub fn apply(&mut self, outcome: FileOutcome, result: &mut IndexFilesResult) {
        match outcome {
            FileOutcome::Indexed { path, hash, chunks } => {
                self.hashes.insert(path, hash);
                result.files_indexed += 1;
                result.chunks_written += chunks;
            }
            FileOutcome::Failed { path, error } => {
                self.hashes.remove(&path);
                result.files_failed += 1;
                result.errors.push(format!("{}: {}", path, error));
            }
        }
    }

    /// Index one file, returning the number of chunks written (0 when unchanged)
    pub async fn index_file(&mut self, path: &str, content: Option<String>) -> Result<usize> {
        let input = FileInput {
            path: path.to_string(),
            content,
        };
        let job = match self.prepare(input)? {
            Prepared::Unchanged => {
                tracing::debug!("Skipping unchanged file {}", path);
                return Ok(0);
            }
            Prepared::Changed(job) => job,
        };

        match self.writer(job.shard_id).write(&job).await {
            Ok(chunks) => {
                self.hashes.insert(job.path, job.hash);
                self.save_hashes();
                Ok(chunks)
            }
            Err(e) => {
                if self.hashes.remove(&job.path).is_some() {
                    self.save_hashes();
                }
                Err(e)
            }
        }
    }

    /// Remove a file from its shard and forget its hash
    pub async fn delete_file(&mut self, path: &str) -> Result<usize> {
        // Forget the hash first so a failed delete is re-indexed rather than skipped
        if self.hashes.remove(path).is_some() {
            self.save_hashes();
        }
        let shard_id = self.shard_of(path);
        let deleted = self.stores[shard_id].delete_by_file(path).await?;
        tracing::debug!("Deleted {} chunks of {} from shard {}", deleted, path, shard_id);
        Ok(deleted)
    }

    /// Index a batch in this task, one file at a time
    ///
    /// Individual failures are collected in the result. Cancellation stops before the next
    /// file.
    pub async fn index_files(
        &mut self,
        files: Vec<FileInput>,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Result<IndexFilesResult> {
        let start = Instant::now();
        let mut result = IndexFilesResult::default();
        let jobs = self.plan(files, &mut result);

        for job in jobs {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let shard_id = job.shard_id;
            let outcome = self.writer(shard_id).process(job).await;
            if let Some(tx) = progress {
                let _ = tx.try_send(ProgressEvent::from_outcome(shard_id, &outcome));
            }
            self.apply(outcome, &mut result);
        }

        self.save_hashes();
        result.duration_ms = start.elapsed().as_millis() as u64;
        log_batch(&result);
        Ok(result)
    }

    /// Index a batch across the worker pool, one unit per group of shards
    pub async fn index_files_parallel(
        &mut self,
        files: Vec<FileInput>,
        pool: &WorkerPool,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<IndexFilesResult> {
        let start = Instant::now();
        let mut result = IndexFilesResult::default();
        let jobs = self.plan(files, &mut result);
        if jobs.is_empty() {
            self.save_hashes();
            result.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let mut by_shard: BTreeMap<usize, Vec<FileJob>> = BTreeMap::new();
        for job in jobs {
            by_shard.entry(job.shard_id).or_default().push(job);
        }
        let submitted: BTreeMap<usize, Vec<String>> = by_shard
            .iter()
            .map(|(shard, jobs)| (*shard, jobs.iter().map(|j| j.path.clone()).collect()))
            .collect();
        let shards_involved = by_shard.len();

        let run = pool.index(by_shard, cancel.clone(), progress).await;

        let mut finished = BTreeSet::new();
        for outcome in run.outcomes {
            let path = match &outcome {
                FileOutcome::Indexed { path, .. } | FileOutcome::Failed { path, .. } => path.clone(),
            };
            finished.insert(path);
            self.apply(outcome, &mut result);
        }

        // Files of a failed shard never reported back; their shard state is unknown
        for error in &run.shard_errors {
            for path in submitted.get(&error.shard_id).into_iter().flatten() {
                if !finished.contains(path) {
                    self.apply(
                        FileOutcome::Failed {
                            path: path.clone(),
                            error: error.to_string(),
                        },
                        &mut result,
                    );
                }
            }
        }

        self.save_hashes();
        result.cancelled = run.cancelled;
        result.duration_ms = start.elapsed().as_millis() as u64;

        let failed_shards: BTreeSet<usize> = run.shard_errors.iter().map(|e| e.shard_id).collect();
        result.shard_errors = run.shard_errors;
        if failed_shards.len() == shards_involved {
            return Err(SeekError::AllShardsFailed(shards_involved).into());
        }

        log_batch(&result);
        Ok(result)
    }

    /// Empty every shard and the hash table
    pub async fn clear(&mut self) -> Result<()> {
        self.hashes.clear();
        self.save_hashes();
        for store in &self.stores {
            store
                .clear()
                .await
                .with_context(|| format!("Failed to clear shard {}", store.shard_id()))?;
        }
        tracing::info!("Cleared {} shards", self.stores.len());
        Ok(())
    }
}

fn log_batch(result: &IndexFilesResult) {
    tracing::info!(
        "Indexed {} files ({} chunks), {} unchanged, {} failed in {} ms{}",
        result.files_indexed,
        result.chunks_written,
        result.files_unchanged,
        result.files_failed,
        result.duration_ms,
        if result.cancelled { " (cancelled)" } else { "" }
    );
}
