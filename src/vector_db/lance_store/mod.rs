//! LanceDB shard store (embedded, no server required)
//!
//! Each shard is its own LanceDB directory holding a single `chunks` table, so worker units
//! can open disjoint shards without sharing a connection.

use super::{
    IndexRecord, SearchFilter, ShardStats, ShardStore, ShardStoreFactory, extension_of, quote,
    score_from_distance,
};
use crate::error::{EmbeddingError, StoreError};
use crate::types::{ResultMetadata, SearchResult};
use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array, types::Float32Type,
};
use arrow_schema::{DataType, Field, Schema};
use futures::stream::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{DistanceType, Table};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const TABLE_NAME: &str = "chunks";

pub struct LanceShardStore {
    shard_id: usize,
    path: PathBuf,
    connection: Connection,
    dimension: AtomicUsize,
}

impl LanceShardStore {
    /// Connect to the shard directory, creating it if needed
    pub async fn open(shard_id: usize, path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| StoreError::OpenFailed {
            shard_id,
            reason: format!("cannot create {}: {}", path.display(), e),
        })?;

        tracing::debug!("Connecting to LanceDB shard {} at {}", shard_id, path.display());

        let connection = lancedb::connect(&path.to_string_lossy())
            .execute()
            .await
            .map_err(|e| StoreError::OpenFailed {
                shard_id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            shard_id,
            path: path.to_path_buf(),
            connection,
            dimension: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create schema for the chunks table
    fn create_schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("id", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("start_line", DataType::UInt32, false),
            Field::new("end_line", DataType::UInt32, false),
            Field::new("language", DataType::Utf8, false),
            Field::new("extension", DataType::Utf8, false),
            Field::new("function_name", DataType::Utf8, true),
            Field::new("content", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("indexed_at", DataType::Int64, false),
        ]))
    }

    /// Vector length declared by an existing table schema
    fn schema_dimension(schema: &Schema) -> Option<usize> {
        match schema.field_with_name("vector").ok()?.data_type() {
            DataType::FixedSizeList(_, size) => Some(*size as usize),
            _ => None,
        }
    }

    fn current_dimension(&self) -> Result<usize> {
        match self.dimension.load(Ordering::Acquire) {
            0 => Err(StoreError::NotInitialized(self.shard_id).into()),
            dimension => Ok(dimension),
        }
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(names.iter().any(|name| name == TABLE_NAME))
    }

    /// Open the table fresh so every call sees the latest committed version
    async fn get_table(&self) -> Result<Table> {
        self.connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| {
                StoreError::OpenFailed {
                    shard_id: self.shard_id,
                    reason: e.to_string(),
                }
                .into()
            })
    }

    async fn create_empty_table(&self, dimension: usize) -> Result<()> {
        let schema = Self::create_schema(dimension);
        let empty_batch = RecordBatch::new_empty(schema.clone());
        let batches = RecordBatchIterator::new(vec![empty_batch].into_iter().map(Ok), schema);

        self.connection
            .create_table(TABLE_NAME, Box::new(batches))
            .execute()
            .await
            .map_err(|e| StoreError::OpenFailed {
                shard_id: self.shard_id,
                reason: format!("failed to create table: {}", e),
            })?;
        Ok(())
    }

    /// Convert records to a RecordBatch
    fn create_record_batch(records: &[IndexRecord], schema: Arc<Schema>) -> Result<RecordBatch> {
        let dimension = Self::schema_dimension(&schema).context("schema has no vector column")?;

        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            records
                .iter()
                .map(|r| Some(r.embedding.iter().copied().map(Some))),
            dimension as i32,
        );
        let id_array = StringArray::from(records.iter().map(|r| r.id()).collect::<Vec<_>>());
        let file_path_array = StringArray::from(
            records
                .iter()
                .map(|r| r.chunk.file_path.as_str())
                .collect::<Vec<_>>(),
        );
        let chunk_index_array = UInt32Array::from(
            records
                .iter()
                .map(|r| r.chunk_index as u32)
                .collect::<Vec<_>>(),
        );
        let start_line_array = UInt32Array::from(
            records
                .iter()
                .map(|r| r.chunk.start_line as u32)
                .collect::<Vec<_>>(),
        );
        let end_line_array = UInt32Array::from(
            records
                .iter()
                .map(|r| r.chunk.end_line as u32)
                .collect::<Vec<_>>(),
        );
        let language_array = StringArray::from(
            records
                .iter()
                .map(|r| r.chunk.language.as_str())
                .collect::<Vec<_>>(),
        );
        let extension_array = StringArray::from(
            records
                .iter()
                .map(|r| extension_of(&r.chunk.file_path))
                .collect::<Vec<_>>(),
        );
        let function_name_array = StringArray::from(
            records
                .iter()
                .map(|r| r.chunk.function_name.as_deref())
                .collect::<Vec<_>>(),
        );
        let content_array = StringArray::from(
            records
                .iter()
                .map(|r| r.chunk.content.as_str())
                .collect::<Vec<_>>(),
        );
        let content_hash_array = StringArray::from(
            records
                .iter()
                .map(|r| r.chunk.content_hash.as_str())
                .collect::<Vec<_>>(),
        );
        let indexed_at_array =
            Int64Array::from(records.iter().map(|r| r.indexed_at).collect::<Vec<_>>());

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(vector_array),
                Arc::new(id_array),
                Arc::new(file_path_array),
                Arc::new(chunk_index_array),
                Arc::new(start_line_array),
                Arc::new(end_line_array),
                Arc::new(language_array),
                Arc::new(extension_array),
                Arc::new(function_name_array),
                Arc::new(content_array),
                Arc::new(content_hash_array),
                Arc::new(indexed_at_array),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    fn check_dimension(&self, records: &[IndexRecord]) -> Result<usize> {
        let dimension = self.current_dimension()?;
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: bad.embedding.len(),
            }
            .into());
        }
        Ok(dimension)
    }

    /// Merge `records` by id; with `replace_file` set, rows of that file missing from
    /// `records` are deleted in the same commit
    async fn merge(&self, records: Vec<IndexRecord>, replace_file: Option<&str>) -> Result<usize> {
        let dimension = self.check_dimension(&records)?;
        let table = self.get_table().await?;
        let schema = Self::create_schema(dimension);
        let batch = Self::create_record_batch(&records, schema.clone())?;
        let count = batch.num_rows();
        let batches = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        if let Some(file_path) = replace_file {
            merge.when_not_matched_by_source_delete(Some(format!(
                "file_path = {}",
                quote(file_path)
            )));
        }
        merge
            .execute(Box::new(batches))
            .await
            .map_err(|e| StoreError::WriteFailed {
                shard_id: self.shard_id,
                reason: e.to_string(),
            })?;

        Ok(count)
    }

    fn parse_results(&self, batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let file_path = string_column(batch, "file_path")?;
        let chunk_index = u32_column(batch, "chunk_index")?;
        let start_line = u32_column(batch, "start_line")?;
        let end_line = u32_column(batch, "end_line")?;
        let language = string_column(batch, "language")?;
        let function_name = string_column(batch, "function_name")?;
        let content = string_column(batch, "content")?;
        let distance = batch
            .column_by_name("_distance")
            .context("Missing _distance column")?
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("Invalid _distance type")?;

        Ok((0..batch.num_rows())
            .map(|i| SearchResult {
                file_path: file_path.value(i).to_string(),
                chunk_index: chunk_index.value(i) as usize,
                content: content.value(i).to_string(),
                similarity_score: score_from_distance(distance.value(i)),
                shard_id: self.shard_id,
                metadata: ResultMetadata {
                    start_line: start_line.value(i) as usize,
                    end_line: end_line.value(i) as usize,
                    language: language.value(i).to_string(),
                    function_name: if function_name.is_null(i) {
                        None
                    } else {
                        Some(function_name.value(i).to_string())
                    },
                },
            })
            .collect())
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Missing {} column", name))?
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| format!("Invalid {} type", name))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Missing {} column", name))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .with_context(|| format!("Invalid {} type", name))
}

/// Total size of the files under `path`
fn directory_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}

#[async_trait::async_trait]
impl ShardStore for LanceShardStore {
    fn shard_id(&self) -> usize {
        self.shard_id
    }

    async fn initialize(&self, dimension: usize) -> Result<()> {
        if self.table_exists().await? {
            let table = self.get_table().await?;
            let schema = table.schema().await.context("Failed to read table schema")?;
            let existing = Self::schema_dimension(&schema).unwrap_or(0);
            if existing != dimension {
                let rows = table.count_rows(None).await.context("Failed to count rows")?;
                if rows > 0 {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: existing,
                        actual: dimension,
                    }
                    .into());
                }
                tracing::info!(
                    "Recreating empty shard {} with dimension {} (was {})",
                    self.shard_id,
                    dimension,
                    existing
                );
                self.connection
                    .drop_table(TABLE_NAME, &[])
                    .await
                    .context("Failed to drop table")?;
                self.create_empty_table(dimension).await?;
            }
        } else {
            self.create_empty_table(dimension).await?;
            tracing::debug!("Created table for shard {}", self.shard_id);
        }

        self.dimension.store(dimension, Ordering::Release);
        Ok(())
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.merge(records, None).await
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<usize> {
        let table = self.get_table().await?;
        let filter = format!("file_path = {}", quote(file_path));

        let existing = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows")?;
        if existing == 0 {
            return Ok(0);
        }

        table
            .delete(&filter)
            .await
            .map_err(|e| StoreError::DeleteFailed {
                shard_id: self.shard_id,
                reason: e.to_string(),
            })?;

        tracing::debug!("Deleted {} chunks of {} from shard {}", existing, file_path, self.shard_id);
        Ok(existing)
    }

    async fn replace_file(&self, file_path: &str, records: Vec<IndexRecord>) -> Result<usize> {
        if records.is_empty() {
            self.delete_by_file(file_path).await?;
            return Ok(0);
        }
        self.merge(records, Some(file_path)).await
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        let dimension = self.current_dimension()?;
        if query.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            }
            .into());
        }

        let table = self.get_table().await?;
        if table.count_rows(None).await.context("Failed to count rows")? == 0 {
            return Ok(vec![]);
        }

        let mut vector_query = table
            .vector_search(query.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = filter.to_sql() {
            vector_query = vector_query.only_if(predicate);
        }

        let stream = vector_query
            .execute()
            .await
            .map_err(|e| StoreError::SearchFailed {
                shard_id: self.shard_id,
                reason: e.to_string(),
            })?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut results = Vec::new();
        for batch in &batches {
            results.extend(self.parse_results(batch)?);
        }
        results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        Ok(results)
    }

    async fn stats(&self) -> Result<ShardStats> {
        let mut stats = ShardStats {
            shard_id: self.shard_id,
            size_bytes: directory_size(&self.path),
            ..Default::default()
        };
        if !self.table_exists().await? {
            return Ok(stats);
        }

        let table = self.get_table().await?;
        let stream = table
            .query()
            .select(Select::Columns(vec![
                "file_path".to_string(),
                "language".to_string(),
                "indexed_at".to_string(),
            ]))
            .execute()
            .await
            .context("Failed to query shard contents")?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to collect shard contents")?;

        let mut files = BTreeSet::new();
        let mut languages: BTreeMap<String, usize> = BTreeMap::new();
        for batch in &batches {
            let file_path = string_column(batch, "file_path")?;
            let language = string_column(batch, "language")?;
            let indexed_at = batch
                .column_by_name("indexed_at")
                .context("Missing indexed_at column")?
                .as_any()
                .downcast_ref::<Int64Array>()
                .context("Invalid indexed_at type")?;

            for i in 0..batch.num_rows() {
                files.insert(file_path.value(i).to_string());
                *languages.entry(language.value(i).to_string()).or_insert(0) += 1;
                stats.last_indexed_at = stats.last_indexed_at.max(Some(indexed_at.value(i)));
                stats.chunk_count += 1;
            }
        }
        stats.file_count = files.len();
        stats.languages = languages;
        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        let dimension = self.current_dimension()?;
        if self.table_exists().await? {
            self.connection
                .drop_table(TABLE_NAME, &[])
                .await
                .context("Failed to drop table")?;
        }
        self.create_empty_table(dimension).await?;
        tracing::info!("Cleared shard {}", self.shard_id);
        Ok(())
    }
}

/// Opens `<root>/shard-NN` directories
pub struct LanceStoreFactory {
    root: PathBuf,
}

impl LanceStoreFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn shard_path(&self, shard_id: usize) -> PathBuf {
        self.root.join(format!("shard-{:02}", shard_id))
    }
}

#[async_trait::async_trait]
impl ShardStoreFactory for LanceStoreFactory {
    async fn open(&self, shard_id: usize, dimension: usize) -> Result<Arc<dyn ShardStore>> {
        let store = LanceShardStore::open(shard_id, &self.shard_path(shard_id)).await?;
        store.initialize(dimension).await?;
        Ok(Arc::new(store))
    }

    fn persistent(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "lancedb"
    }
}
