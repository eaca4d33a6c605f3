//! In-process shard store
//!
//! Brute-force cosine search over records held in memory. Used for `store.backend = "memory"`
//! and throughout the test suite.

use super::{
    IndexRecord, SearchFilter, ShardStats, ShardStore, ShardStoreFactory, score_from_cosine,
};
use crate::error::{EmbeddingError, StoreError};
use crate::types::SearchResult;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Default)]
struct ShardData {
    dimension: usize,
    records: BTreeMap<String, IndexRecord>,
}

pub struct MemoryShardStore {
    shard_id: usize,
    data: RwLock<ShardData>,
}

impl MemoryShardStore {
    pub fn new(shard_id: usize) -> Self {
        Self {
            shard_id,
            data: RwLock::new(ShardData::default()),
        }
    }

    fn poisoned(&self) -> anyhow::Error {
        anyhow::anyhow!("shard {} lock poisoned", self.shard_id)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait::async_trait]
impl ShardStore for MemoryShardStore {
    fn shard_id(&self) -> usize {
        self.shard_id
    }

    async fn initialize(&self, dimension: usize) -> Result<()> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        if data.dimension != 0 && data.dimension != dimension && !data.records.is_empty() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: data.dimension,
                actual: dimension,
            }
            .into());
        }
        data.dimension = dimension;
        Ok(())
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<usize> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        if data.dimension == 0 {
            return Err(StoreError::NotInitialized(self.shard_id).into());
        }
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != data.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: data.dimension,
                actual: bad.embedding.len(),
            }
            .into());
        }
        let count = records.len();
        for record in records {
            data.records.insert(record.id(), record);
        }
        Ok(count)
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<usize> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        let before = data.records.len();
        data.records.retain(|_, r| r.chunk.file_path != file_path);
        Ok(before - data.records.len())
    }

    async fn replace_file(&self, file_path: &str, records: Vec<IndexRecord>) -> Result<usize> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        if data.dimension == 0 {
            return Err(StoreError::NotInitialized(self.shard_id).into());
        }
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != data.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: data.dimension,
                actual: bad.embedding.len(),
            }
            .into());
        }
        // Delete and insert under one write lock
        data.records.retain(|_, r| r.chunk.file_path != file_path);
        let count = records.len();
        for record in records {
            data.records.insert(record.id(), record);
        }
        Ok(count)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        let data = self.data.read().map_err(|_| self.poisoned())?;
        if data.dimension != 0 && query.len() != data.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: data.dimension,
                actual: query.len(),
            }
            .into());
        }

        let mut scored: Vec<(f32, &IndexRecord)> = data
            .records
            .values()
            .filter(|r| filter.matches(&r.chunk.file_path, &r.chunk.language))
            .map(|r| (score_from_cosine(cosine(query, &r.embedding)), r))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, record)| record.to_search_result(score))
            .collect())
    }

    async fn stats(&self) -> Result<ShardStats> {
        let data = self.data.read().map_err(|_| self.poisoned())?;
        let mut files = BTreeSet::new();
        let mut languages = BTreeMap::new();
        let mut last_indexed_at = None;
        let mut size_bytes = 0u64;
        for record in data.records.values() {
            files.insert(record.chunk.file_path.as_str());
            *languages.entry(record.chunk.language.clone()).or_insert(0) += 1;
            last_indexed_at = last_indexed_at.max(Some(record.indexed_at));
            size_bytes += (record.chunk.content.len() + record.embedding.len() * 4) as u64;
        }
        Ok(ShardStats {
            shard_id: self.shard_id,
            file_count: files.len(),
            chunk_count: data.records.len(),
            size_bytes,
            last_indexed_at,
            languages,
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        data.records.clear();
        Ok(())
    }
}

/// Hands out one shared in-memory shard per id
#[derive(Default)]
pub struct MemoryStoreFactory {
    shards: Mutex<HashMap<usize, Arc<MemoryShardStore>>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ShardStoreFactory for MemoryStoreFactory {
    async fn open(&self, shard_id: usize, dimension: usize) -> Result<Arc<dyn ShardStore>> {
        let shard = {
            let mut shards = self
                .shards
                .lock()
                .map_err(|_| anyhow::anyhow!("memory store registry lock poisoned"))?;
            Arc::clone(
                shards
                    .entry(shard_id)
                    .or_insert_with(|| Arc::new(MemoryShardStore::new(shard_id))),
            )
        };
        shard.initialize(dimension).await?;
        Ok(shard)
    }

    fn persistent(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
