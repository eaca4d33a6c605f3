//! Per-project service façade
//!
//! A [`SearchService`] owns one store directory: the embedding backend, every shard store,
//! the content-hash table and the worker pool. It moves through
//! `uninitialized → initializing → ready → disposed`; every operation except
//! [`SearchService::initialize`] and [`SearchService::dispose`] fails fast unless the
//! service is ready. Instances are looked up by store path through a [`ServiceRegistry`].

mod registry;

pub use registry::ServiceRegistry;

use crate::cache::{FileHashTable, HASH_TABLE_FILE};
use crate::config::Config;
use crate::embedding::{EmbeddingBackend, build_candidates, select_backend};
use crate::error::{IndexingError, SeekError, SeekResult, ValidationError};
use crate::fs_lock::StoreLock;
use crate::indexer::{CodeChunker, FileInput, FileWalker, IndexFilesResult, Indexer};
use crate::paths::PlatformPaths;
use crate::searcher::{SearchOptions, SearchOutcome, Searcher};
use crate::types::{IndexDirectoryRequest, IndexDirectoryResponse, IndexStats, LanguageStats};
use crate::vector_db::{
    LanceStoreFactory, MemoryStoreFactory, SearchFilter, ShardStore, ShardStoreFactory,
    StoreManifest,
};
use crate::worker_pool::{ProgressEvent, WorkerPool};
use anyhow::Context;
use futures::future::join_all;
use registry::Registration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Initializing => "initializing",
            ServiceState::Ready => "ready",
            ServiceState::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of change reported by a file watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    Added,
    Modified,
    Deleted,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(Arc<Engine>),
    Disposed,
}

impl Lifecycle {
    fn state(&self) -> ServiceState {
        match self {
            Lifecycle::Uninitialized => ServiceState::Uninitialized,
            Lifecycle::Initializing => ServiceState::Initializing,
            Lifecycle::Ready(_) => ServiceState::Ready,
            Lifecycle::Disposed => ServiceState::Disposed,
        }
    }
}

/// Everything a ready service owns
struct Engine {
    backend: Arc<dyn EmbeddingBackend>,
    stores: Vec<Arc<dyn ShardStore>>,
    indexer: Mutex<Indexer>,
    searcher: Searcher,
    pool: Option<WorkerPool>,
    persistent: bool,
    lock: std::sync::Mutex<Option<StoreLock>>,
}

impl Engine {
    /// Wait for the running write, then release the backend, the stores and the lock
    async fn release(&self) {
        let _indexer = self.indexer.lock().await;
        self.backend.dispose().await;
        for store in &self.stores {
            store.dispose().await;
        }
        if let Ok(mut lock) = self.lock.lock() {
            lock.take();
        }
    }
}

/// Search engine bound to one store directory
pub struct SearchService {
    config: Config,
    store_dir: PathBuf,
    lifecycle: RwLock<Lifecycle>,
    /// Serializes `initialize` calls
    init_lock: Mutex<()>,
    /// Cancels a running backend selection on dispose
    shutdown: CancellationToken,
    backend_override: Option<Arc<dyn EmbeddingBackend>>,
    factory_override: Option<Arc<dyn ShardStoreFactory>>,
    registration: Option<Registration>,
}

impl SearchService {
    pub fn new(config: Config) -> Self {
        let store_dir = PlatformPaths::resolve(&config.store.path);
        Self {
            config,
            store_dir,
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            init_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
            backend_override: None,
            factory_override: None,
            registration: None,
        }
    }

    /// Use an already initialized backend instead of probing
    pub fn with_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    /// Open shards through this factory instead of the configured store backend
    pub fn with_store_factory(mut self, factory: Arc<dyn ShardStoreFactory>) -> Self {
        self.factory_override = Some(factory);
        self
    }

    pub(crate) fn registered(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub async fn state(&self) -> ServiceState {
        self.lifecycle.read().await.state()
    }

    async fn engine(&self) -> SeekResult<Arc<Engine>> {
        match &*self.lifecycle.read().await {
            Lifecycle::Ready(engine) => Ok(engine.clone()),
            Lifecycle::Disposed => Err(SeekError::Disposed),
            other => Err(SeekError::NotInitialized(other.state().to_string())),
        }
    }

    /// Select the backend, lock and open the store, load the hash table
    ///
    /// Calling it on a ready service is a no-op. A failed initialization leaves the
    /// service uninitialized so it can be retried.
    pub async fn initialize(&self) -> SeekResult<()> {
        let _init = self.init_lock.lock().await;
        {
            let mut lifecycle = self.lifecycle.write().await;
            match &*lifecycle {
                Lifecycle::Ready(_) => return Ok(()),
                Lifecycle::Disposed => return Err(SeekError::Disposed),
                _ => *lifecycle = Lifecycle::Initializing,
            }
        }

        let start = Instant::now();
        tracing::info!("Initializing search service at {}", self.store_dir.display());
        let built = self.build_engine().await;

        let mut lifecycle = self.lifecycle.write().await;
        if matches!(*lifecycle, Lifecycle::Disposed) {
            if let Ok(engine) = built {
                engine.release().await;
            }
            return Err(SeekError::Disposed);
        }
        match built {
            Ok(engine) => {
                tracing::info!(
                    "Search service ready: {} shards, backend {} ({} ms)",
                    engine.stores.len(),
                    engine.backend.identity(),
                    start.elapsed().as_millis()
                );
                *lifecycle = Lifecycle::Ready(Arc::new(engine));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Initialization failed: {}", e);
                *lifecycle = Lifecycle::Uninitialized;
                Err(e)
            }
        }
    }

    fn store_factory(&self) -> Arc<dyn ShardStoreFactory> {
        if let Some(factory) = &self.factory_override {
            return factory.clone();
        }
        match self.config.store.backend.as_str() {
            "memory" => Arc::new(MemoryStoreFactory::new()),
            _ => Arc::new(LanceStoreFactory::new(self.store_dir.clone())),
        }
    }

    async fn choose_backend(&self) -> SeekResult<Arc<dyn EmbeddingBackend>> {
        if let Some(backend) = &self.backend_override {
            return Ok(backend.clone());
        }
        let choice = self.config.backend_choice()?;
        let candidates = build_candidates(&self.config)?;
        let backend = select_backend(candidates, choice, &self.shutdown).await?;
        Ok(Arc::from(backend))
    }

    async fn build_engine(&self) -> SeekResult<Engine> {
        self.config.validate()?;
        let factory = self.store_factory();
        let persistent = factory.persistent();

        let lock = if persistent {
            Some(StoreLock::acquire(&self.store_dir)?)
        } else {
            None
        };

        let backend = self.choose_backend().await?;
        match self.open_engine(backend.clone(), factory, lock).await {
            Ok(engine) => Ok(engine),
            Err(e) => {
                backend.dispose().await;
                Err(e)
            }
        }
    }

    async fn open_engine(
        &self,
        backend: Arc<dyn EmbeddingBackend>,
        factory: Arc<dyn ShardStoreFactory>,
        lock: Option<StoreLock>,
    ) -> SeekResult<Engine> {
        let shard_count = self.config.store.shard_count;
        let dimension = backend.dimension();
        let persistent = factory.persistent();

        if persistent {
            let requested = StoreManifest::new(backend.identity(), dimension, shard_count);
            match StoreManifest::load(&self.store_dir)? {
                Some(existing) => existing.ensure_compatible(&requested, &self.store_dir)?,
                None => requested.save(&self.store_dir)?,
            }
        }

        let mut stores = Vec::with_capacity(shard_count);
        for shard_id in 0..shard_count {
            let store = factory
                .open(shard_id, dimension)
                .await
                .with_context(|| format!("Failed to open shard {}", shard_id))?;
            stores.push(store);
        }
        tracing::debug!("Opened {} {} shards", shard_count, factory.name());

        let hash_path = persistent.then(|| self.store_dir.join(HASH_TABLE_FILE));
        let hashes = match &hash_path {
            Some(path) => FileHashTable::load(path).unwrap_or_else(|e| {
                tracing::warn!("{}; every file will be re-indexed", e);
                FileHashTable::default()
            }),
            None => FileHashTable::default(),
        };

        let chunker = CodeChunker::from_config(&self.config.indexing);
        let indexer = Indexer::new(
            backend.clone(),
            stores.clone(),
            chunker.clone(),
            hashes,
            hash_path,
            self.config.indexing.max_file_size,
        );
        let searcher = Searcher::new(backend.clone(), stores.clone());
        let pool = self.config.pool.parallel.then(|| {
            WorkerPool::new(
                factory.clone(),
                backend.clone(),
                chunker,
                self.config.pool.worker_count,
            )
        });

        Ok(Engine {
            backend,
            stores,
            indexer: Mutex::new(indexer),
            searcher,
            pool,
            persistent,
            lock: std::sync::Mutex::new(lock),
        })
    }

    /// Search options from the configured defaults and per-call overrides
    pub fn search_options(
        &self,
        limit: Option<usize>,
        threshold: Option<f32>,
        filter: SearchFilter,
    ) -> SeekResult<SearchOptions> {
        let limit = limit.unwrap_or(self.config.search.limit);
        if limit == 0 {
            return Err(ValidationError::ConstraintViolation {
                field: "limit".to_string(),
                constraint: "at least 1".to_string(),
                actual: limit.to_string(),
            }
            .into());
        }
        let min_score = threshold.unwrap_or(self.config.search.min_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(ValidationError::ConstraintViolation {
                field: "threshold".to_string(),
                constraint: "between 0.0 and 1.0".to_string(),
                actual: min_score.to_string(),
            }
            .into());
        }
        Ok(SearchOptions {
            limit,
            min_score,
            top_k_per_shard: self.config.search.top_k_per_shard.unwrap_or(limit),
            filter,
        })
    }

    /// Rank chunks across every shard; failed shards are listed beside the results
    pub async fn search(&self, query: &str, options: &SearchOptions) -> SeekResult<SearchOutcome> {
        let engine = self.engine().await?;
        let outcome = match &engine.pool {
            Some(pool) if engine.stores.len() > 1 => {
                engine.searcher.search_parallel(query, options, pool).await?
            }
            _ => engine.searcher.search(query, options).await?,
        };
        tracing::debug!(
            "Search returned {} results ({} shard errors)",
            outcome.results.len(),
            outcome.shard_errors.len()
        );
        Ok(outcome)
    }

    /// Index one file; content is read from disk when `None`
    pub async fn index_file(&self, path: &str, content: Option<String>) -> SeekResult<usize> {
        let engine = self.engine().await?;
        let mut indexer = engine.indexer.lock().await;
        Ok(indexer.index_file(path, content).await?)
    }

    pub async fn delete_file(&self, path: &str) -> SeekResult<usize> {
        let engine = self.engine().await?;
        let mut indexer = engine.indexer.lock().await;
        Ok(indexer.delete_file(path).await?)
    }

    /// Route a watcher event to `index_file` or `delete_file`
    pub async fn on_file_change(&self, path: &str, change: FileChange) -> SeekResult<usize> {
        tracing::debug!("File change {:?}: {}", change, path);
        match change {
            FileChange::Added | FileChange::Modified => self.index_file(path, None).await,
            FileChange::Deleted => self.delete_file(path).await,
        }
    }

    /// Index a batch, through the worker pool when more than one shard exists
    pub async fn index_files(
        &self,
        files: Vec<FileInput>,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> SeekResult<IndexFilesResult> {
        let engine = self.engine().await?;
        let mut indexer = engine.indexer.lock().await;
        let result = match &engine.pool {
            Some(pool) if indexer.shard_count() > 1 => {
                indexer
                    .index_files_parallel(files, pool, cancel, progress)
                    .await?
            }
            _ => indexer.index_files(files, cancel, progress.as_ref()).await?,
        };
        Ok(result)
    }

    /// Walk a directory, index every eligible file and drop files that disappeared
    pub async fn index_directory(
        &self,
        request: &IndexDirectoryRequest,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> SeekResult<IndexDirectoryResponse> {
        let start = Instant::now();
        let engine = self.engine().await?;

        let root = PlatformPaths::resolve(Path::new(&request.path));
        if !root.exists() {
            return Err(IndexingError::DirectoryNotFound(request.path.clone()).into());
        }
        if !root.is_dir() {
            return Err(IndexingError::NotADirectory(request.path.clone()).into());
        }

        let walker = FileWalker::new(&root, self.config.indexing.max_file_size)
            .with_patterns(
                request.include_patterns.clone(),
                request.exclude_patterns.clone(),
            )
            .with_cancellation(cancel.clone());
        let found = tokio::task::spawn_blocking(move || walker.walk())
            .await
            .map_err(|e| SeekError::other(format!("Directory walk failed: {}", e)))??;

        let walked: BTreeSet<String> = found
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let files = walked.iter().cloned().map(FileInput::from_path).collect();
        let batch = self.index_files(files, cancel, progress).await?;

        let mut response = IndexDirectoryResponse {
            files_found: walked.len(),
            files_indexed: batch.files_indexed,
            files_unchanged: batch.files_unchanged,
            chunks_written: batch.chunks_written,
            errors: batch.errors,
            shard_errors: batch.shard_errors,
            cancelled: batch.cancelled || cancel.is_cancelled(),
            ..Default::default()
        };

        // A filtered or cancelled walk does not see every file, so nothing is stale
        let complete_walk = !response.cancelled
            && request.include_patterns.is_empty()
            && request.exclude_patterns.is_empty();
        if complete_walk {
            let mut indexer = engine.indexer.lock().await;
            let stale: Vec<String> = indexer
                .hashes()
                .paths_under(&root.to_string_lossy())
                .into_iter()
                .filter(|path| !walked.contains(path))
                .collect();
            for path in stale {
                match indexer.delete_file(&path).await {
                    Ok(_) => response.files_removed += 1,
                    Err(e) => response.errors.push(format!("{}: {:#}", path, e)),
                }
            }
        }

        response.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Indexed {}: {} found, {} indexed, {} unchanged, {} removed, {} errors",
            root.display(),
            response.files_found,
            response.files_indexed,
            response.files_unchanged,
            response.files_removed,
            response.errors.len()
        );
        Ok(response)
    }

    /// Selected backend identity, `None` unless ready
    pub async fn backend_identity(&self) -> Option<String> {
        match &*self.lifecycle.read().await {
            Lifecycle::Ready(engine) => Some(engine.backend.identity()),
            _ => None,
        }
    }

    /// Aggregate statistics recomputed from the shard stores
    pub async fn get_stats(&self) -> SeekResult<IndexStats> {
        let engine = self.engine().await?;
        let answers = join_all(engine.stores.iter().map(|store| store.stats())).await;

        let mut stats = IndexStats {
            total_files: 0,
            total_chunks: 0,
            database_size_bytes: 0,
            last_indexed_at: None,
            shard_count: engine.stores.len(),
            language_breakdown: Vec::new(),
        };
        let mut languages: BTreeMap<String, usize> = BTreeMap::new();
        let mut last_indexed: Option<i64> = None;
        let mut failed = 0;

        for (store, answer) in engine.stores.iter().zip(answers) {
            match answer {
                Ok(shard) => {
                    stats.total_files += shard.file_count;
                    stats.total_chunks += shard.chunk_count;
                    stats.database_size_bytes += shard.size_bytes;
                    last_indexed = last_indexed.max(shard.last_indexed_at);
                    for (language, count) in shard.languages {
                        *languages.entry(language).or_default() += count;
                    }
                }
                Err(e) => {
                    tracing::warn!("Stats for shard {} failed: {:#}", store.shard_id(), e);
                    failed += 1;
                }
            }
        }
        if failed > 0 && failed == engine.stores.len() {
            return Err(SeekError::AllShardsFailed(failed));
        }

        stats.last_indexed_at = last_indexed
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|time| time.to_rfc3339());
        stats.language_breakdown = languages
            .into_iter()
            .map(|(language, chunk_count)| LanguageStats {
                language,
                chunk_count,
            })
            .collect();
        stats
            .language_breakdown
            .sort_by(|a, b| b.chunk_count.cmp(&a.chunk_count));
        Ok(stats)
    }

    /// State plus statistics when ready; never fails
    pub async fn get_status(&self) -> (ServiceState, Option<IndexStats>) {
        let state = self.state().await;
        if state != ServiceState::Ready {
            return (state, None);
        }
        match self.get_stats().await {
            Ok(stats) => (state, Some(stats)),
            Err(e) => {
                tracing::warn!("Failed to collect stats: {}", e);
                (state, None)
            }
        }
    }

    /// Empty every shard and the hash table
    pub async fn clear(&self) -> SeekResult<()> {
        let engine = self.engine().await?;
        let mut indexer = engine.indexer.lock().await;
        indexer.clear().await?;
        if engine.persistent {
            StoreManifest::new(
                engine.backend.identity(),
                engine.backend.dimension(),
                engine.stores.len(),
            )
            .save(&self.store_dir)?;
        }
        Ok(())
    }

    /// Release the backend, the stores and the store lock; safe to call repeatedly
    ///
    /// The instance leaves its registry and cannot be initialized again.
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        let previous = {
            let mut lifecycle = self.lifecycle.write().await;
            std::mem::replace(&mut *lifecycle, Lifecycle::Disposed)
        };
        if let Lifecycle::Ready(engine) = previous {
            engine.release().await;
            tracing::info!("Disposed search service at {}", self.store_dir.display());
        }
        if let Some(registration) = &self.registration {
            registration.remove(self);
        }
    }

    /// Delete a store directory's shards, manifest and hash table so it can be rebuilt
    ///
    /// Fails with a lock error while any service holds the store.
    pub fn purge_store(store_dir: &Path) -> SeekResult<()> {
        let store_dir = PlatformPaths::resolve(store_dir);
        if !store_dir.exists() {
            return Ok(());
        }
        let _lock = StoreLock::acquire(&store_dir)?;
        for entry in std::fs::read_dir(&store_dir)? {
            let entry = entry?;
            if entry.file_name() == crate::fs_lock::LOCK_FILE {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        tracing::info!("Purged store {}", store_dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests;
