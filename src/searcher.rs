//! Query path: embed once, fan out to every shard, merge by score

use crate::embedding::EmbeddingBackend;
use crate::error::{SeekError, ValidationError};
use crate::types::{SearchResult, ShardError};
use crate::vector_db::{SearchFilter, ShardStore};
use crate::worker_pool::WorkerPool;
use anyhow::{Context, Result};
use futures::future::join_all;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Results scoring below this are dropped
    pub min_score: f32,
    /// Candidates requested from each shard; raised to `limit` when smaller
    pub top_k_per_shard: usize,
    pub filter: SearchFilter,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: 0.5,
            top_k_per_shard: 10,
            filter: SearchFilter::default(),
        }
    }
}

impl SearchOptions {
    /// Per-shard K, never below the global limit
    pub fn per_shard_k(&self) -> usize {
        self.top_k_per_shard.max(self.limit)
    }
}

/// Ranked results plus the shards that could not answer
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub shard_errors: Vec<ShardError>,
}

/// Descending by score, then by path and chunk index so equal scores order stably
pub fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.similarity_score
        .total_cmp(&a.similarity_score)
        .then_with(|| a.file_path.cmp(&b.file_path))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
}

/// Drop low scores, sort globally and keep the best `limit`
pub fn merge_results(
    results: impl IntoIterator<Item = SearchResult>,
    limit: usize,
    min_score: f32,
) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| r.similarity_score >= min_score)
        .collect();
    merged.sort_by(compare_results);
    merged.truncate(limit);
    merged
}

pub struct Searcher {
    backend: Arc<dyn EmbeddingBackend>,
    stores: Vec<Arc<dyn ShardStore>>,
}

impl Searcher {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, stores: Vec<Arc<dyn ShardStore>>) -> Self {
        Self { backend, stores }
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(SeekError::from(ValidationError::Empty("query".to_string())).into());
        }
        self.backend
            .embed(query)
            .await
            .context("Failed to embed query")
    }

    /// Search every shard from this task
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchOutcome> {
        let vector = self.embed_query(query).await?;
        self.search_vector(&vector, options).await
    }

    pub async fn search_vector(
        &self,
        vector: &[f32],
        options: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let k = options.per_shard_k();
        let lookups = self.stores.iter().map(|store| async move {
            let answer = store.search(vector, k, &options.filter).await;
            (store.shard_id(), answer)
        });
        let answers = join_all(lookups).await;

        let mut candidates = Vec::new();
        let mut shard_errors = Vec::new();
        for (shard_id, answer) in answers {
            match answer {
                Ok(results) => candidates.extend(results),
                Err(e) => {
                    tracing::warn!("Shard {} search failed: {:#}", shard_id, e);
                    shard_errors.push(ShardError::new(shard_id, format!("{:#}", e)));
                }
            }
        }

        if !self.stores.is_empty() && shard_errors.len() == self.stores.len() {
            return Err(SeekError::AllShardsFailed(self.stores.len()).into());
        }

        Ok(SearchOutcome {
            results: merge_results(candidates, options.limit, options.min_score),
            shard_errors,
        })
    }

    /// Search with each worker unit querying its own shards
    pub async fn search_parallel(
        &self,
        query: &str,
        options: &SearchOptions,
        pool: &WorkerPool,
    ) -> Result<SearchOutcome> {
        let vector = self.embed_query(query).await?;
        let shard_ids: Vec<usize> = self.stores.iter().map(|s| s.shard_id()).collect();
        pool.search(vector, shard_ids, options).await
    }
}
