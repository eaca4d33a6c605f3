//! Fakes shared by unit tests

use crate::embedding::{BackendKind, EmbeddingBackend, HashingBackend, ProbeResult};
use crate::error::StoreError;
use crate::types::SearchResult;
use crate::vector_db::{
    IndexRecord, MemoryStoreFactory, SearchFilter, ShardStats, ShardStore, ShardStoreFactory,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// CPU hashing backend that counts embedding work
#[derive(Clone)]
pub struct CountingBackend {
    inner: Arc<HashingBackend>,
    pub batches: Arc<AtomicUsize>,
    pub texts: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: Arc::new(HashingBackend::new(dimension)),
            batches: Arc::new(AtomicUsize::new(0)),
            texts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn embedded_texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for CountingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn model_name(&self) -> &str {
        "counting"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn probe(&self) -> ProbeResult {
        ProbeResult::available("counting")
    }

    async fn initialize(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

/// Store whose reads and writes always fail
pub struct FailingStore {
    shard_id: usize,
}

impl FailingStore {
    pub fn new(shard_id: usize) -> Self {
        Self { shard_id }
    }
}

#[async_trait]
impl ShardStore for FailingStore {
    fn shard_id(&self) -> usize {
        self.shard_id
    }

    async fn initialize(&self, _dimension: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, _records: Vec<IndexRecord>) -> Result<usize> {
        Err(StoreError::WriteFailed {
            shard_id: self.shard_id,
            reason: "disk on fire".to_string(),
        }
        .into())
    }

    async fn delete_by_file(&self, _file_path: &str) -> Result<usize> {
        Err(StoreError::WriteFailed {
            shard_id: self.shard_id,
            reason: "disk on fire".to_string(),
        }
        .into())
    }

    async fn search(
        &self,
        _query: &[f32],
        _top_k: usize,
        _filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        Err(StoreError::SearchFailed {
            shard_id: self.shard_id,
            reason: "disk on fire".to_string(),
        }
        .into())
    }

    async fn stats(&self) -> Result<ShardStats> {
        Ok(ShardStats {
            shard_id: self.shard_id,
            ..Default::default()
        })
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory factory that hands out [`FailingStore`]s for selected shards, or refuses to
/// open them at all
pub struct FlakyFactory {
    pub inner: MemoryStoreFactory,
    failing: BTreeSet<usize>,
    unopenable: BTreeSet<usize>,
}

impl FlakyFactory {
    pub fn new(failing: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: MemoryStoreFactory::new(),
            failing: failing.into_iter().collect(),
            unopenable: BTreeSet::new(),
        }
    }

    pub fn unopenable(shards: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: MemoryStoreFactory::new(),
            failing: BTreeSet::new(),
            unopenable: shards.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ShardStoreFactory for FlakyFactory {
    async fn open(&self, shard_id: usize, dimension: usize) -> Result<Arc<dyn ShardStore>> {
        if self.unopenable.contains(&shard_id) {
            return Err(StoreError::OpenFailed {
                shard_id,
                reason: "permission denied".to_string(),
            }
            .into());
        }
        if self.failing.contains(&shard_id) {
            return Ok(Arc::new(FailingStore::new(shard_id)));
        }
        self.inner.open(shard_id, dimension).await
    }

    fn persistent(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Open `count` initialized shards from a factory
pub async fn open_shards(
    factory: &dyn ShardStoreFactory,
    count: usize,
    dimension: usize,
) -> Vec<Arc<dyn ShardStore>> {
    let mut stores = Vec::with_capacity(count);
    for shard_id in 0..count {
        stores.push(factory.open(shard_id, dimension).await.unwrap());
    }
    stores
}
