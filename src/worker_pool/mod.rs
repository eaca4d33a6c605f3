//! Worker pool: shard-local indexing and search on isolated OS threads
//!
//! Every operation spawns its units fresh. A unit is a named thread driving its own
//! current-thread runtime. It opens its own store handles for the shards it was assigned,
//! drains its task channel and exits, and the pool joins every unit before returning.

use crate::embedding::EmbeddingBackend;
use crate::error::SeekError;
use crate::indexer::{CodeChunker, FileJob, FileOutcome, ShardWriter};
use crate::searcher::{SearchOptions, SearchOutcome, merge_results};
use crate::types::{SearchResult, ShardError};
use crate::vector_db::{SearchFilter, ShardStore, ShardStoreFactory};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Work sent to a unit, one message per shard
#[derive(Debug)]
pub enum UnitTask {
    Index {
        shard_id: usize,
        jobs: Vec<FileJob>,
    },
    Search {
        shard_id: usize,
        vector: Arc<[f32]>,
        top_k: usize,
        filter: SearchFilter,
    },
}

impl UnitTask {
    pub fn shard_id(&self) -> usize {
        match self {
            UnitTask::Index { shard_id, .. } | UnitTask::Search { shard_id, .. } => *shard_id,
        }
    }
}

/// Results sent back by a unit; never dropped
#[derive(Debug)]
pub enum UnitMessage {
    FileDone {
        unit: usize,
        shard_id: usize,
        outcome: FileOutcome,
    },
    SearchHits {
        unit: usize,
        shard_id: usize,
        results: Vec<SearchResult>,
    },
    ShardFailed {
        unit: usize,
        shard_id: usize,
        error: String,
    },
    /// The unit stopped taking files from this shard
    Cancelled { unit: usize, shard_id: usize },
}

/// Best-effort progress, dropped when the receiver falls behind
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    FileIndexed {
        shard_id: usize,
        file_path: String,
        chunks: usize,
    },
    FileFailed {
        shard_id: usize,
        file_path: String,
        error: String,
    },
    ShardFinished {
        shard_id: usize,
        files: usize,
        chunks: usize,
    },
}

impl ProgressEvent {
    pub fn from_outcome(shard_id: usize, outcome: &FileOutcome) -> Self {
        match outcome {
            FileOutcome::Indexed { path, chunks, .. } => ProgressEvent::FileIndexed {
                shard_id,
                file_path: path.clone(),
                chunks: *chunks,
            },
            FileOutcome::Failed { path, error } => ProgressEvent::FileFailed {
                shard_id,
                file_path: path.clone(),
                error: error.clone(),
            },
        }
    }
}

/// Merged result of a parallel indexing run
#[derive(Debug, Default)]
pub struct PoolIndexRun {
    pub outcomes: Vec<FileOutcome>,
    pub shard_errors: Vec<ShardError>,
    pub cancelled: bool,
}

/// `min(available_parallelism - 1, shards)`, never zero
pub fn default_unit_count(shards: usize) -> usize {
    let available = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    available.saturating_sub(1).min(shards).max(1)
}

/// Round-robin shard assignment: unit `i` gets every shard at a position `p` with
/// `p % unit_count == i`. Units that would get nothing are left out.
pub fn plan_units(shard_ids: &[usize], unit_count: usize) -> Vec<Vec<usize>> {
    let unit_count = unit_count.max(1);
    let mut units = vec![Vec::new(); unit_count];
    for (position, shard_id) in shard_ids.iter().enumerate() {
        units[position % unit_count].push(*shard_id);
    }
    units.retain(|shards| !shards.is_empty());
    units
}

/// Everything a unit needs; owned, so nothing is shared mutably across units
struct UnitContext {
    unit: usize,
    shard_ids: Vec<usize>,
    factory: Arc<dyn ShardStoreFactory>,
    backend: Arc<dyn EmbeddingBackend>,
    chunker: CodeChunker,
    dimension: usize,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<ProgressEvent>>,
}

pub struct WorkerPool {
    factory: Arc<dyn ShardStoreFactory>,
    backend: Arc<dyn EmbeddingBackend>,
    chunker: CodeChunker,
    worker_count: Option<usize>,
}

impl WorkerPool {
    pub fn new(
        factory: Arc<dyn ShardStoreFactory>,
        backend: Arc<dyn EmbeddingBackend>,
        chunker: CodeChunker,
        worker_count: Option<usize>,
    ) -> Self {
        Self {
            factory,
            backend,
            chunker,
            worker_count,
        }
    }

    /// Units used for an operation touching `shards` shards
    pub fn unit_count_for(&self, shards: usize) -> usize {
        match self.worker_count {
            Some(count) => count.min(shards).max(1),
            None => default_unit_count(shards),
        }
    }

    /// Write every job through the unit owning its shard
    pub async fn index(
        &self,
        jobs: BTreeMap<usize, Vec<FileJob>>,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> PoolIndexRun {
        let shard_ids: Vec<usize> = jobs.keys().copied().collect();
        let tasks = jobs
            .into_iter()
            .map(|(shard_id, jobs)| (shard_id, UnitTask::Index { shard_id, jobs }))
            .collect();

        let (messages, mut shard_errors) = self.run(&shard_ids, tasks, cancel, progress).await;

        let mut run = PoolIndexRun::default();
        for message in messages {
            match message {
                UnitMessage::FileDone { outcome, .. } => run.outcomes.push(outcome),
                UnitMessage::ShardFailed {
                    shard_id, error, ..
                } => shard_errors.push(ShardError::new(shard_id, error)),
                UnitMessage::Cancelled { .. } => run.cancelled = true,
                UnitMessage::SearchHits { .. } => {}
            }
        }
        shard_errors.sort_by_key(|e| e.shard_id);
        run.shard_errors = shard_errors;
        run
    }

    /// Query every listed shard for its local top-K and cut the merged list globally
    pub async fn search(
        &self,
        vector: Vec<f32>,
        shard_ids: Vec<usize>,
        options: &SearchOptions,
    ) -> Result<SearchOutcome> {
        if shard_ids.is_empty() {
            return Ok(SearchOutcome::default());
        }

        let vector: Arc<[f32]> = vector.into();
        let top_k = options.per_shard_k();
        let tasks = shard_ids
            .iter()
            .map(|&shard_id| {
                (
                    shard_id,
                    UnitTask::Search {
                        shard_id,
                        vector: vector.clone(),
                        top_k,
                        filter: options.filter.clone(),
                    },
                )
            })
            .collect();

        let (messages, mut shard_errors) = self
            .run(&shard_ids, tasks, CancellationToken::new(), None)
            .await;

        let mut candidates = Vec::new();
        for message in messages {
            match message {
                UnitMessage::SearchHits { results, .. } => candidates.extend(results),
                UnitMessage::ShardFailed {
                    shard_id, error, ..
                } => shard_errors.push(ShardError::new(shard_id, error)),
                UnitMessage::FileDone { .. } | UnitMessage::Cancelled { .. } => {}
            }
        }
        shard_errors.sort_by_key(|e| e.shard_id);

        let failed: BTreeSet<usize> = shard_errors.iter().map(|e| e.shard_id).collect();
        if failed.len() == shard_ids.len() {
            return Err(SeekError::AllShardsFailed(shard_ids.len()).into());
        }

        Ok(SearchOutcome {
            results: merge_results(candidates, options.limit, options.min_score),
            shard_errors,
        })
    }

    /// Spawn the units, feed them their tasks, collect every message and join them all
    async fn run(
        &self,
        shard_ids: &[usize],
        mut tasks: BTreeMap<usize, UnitTask>,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> (Vec<UnitMessage>, Vec<ShardError>) {
        let assignments = plan_units(shard_ids, self.unit_count_for(shard_ids.len()));
        tracing::debug!(
            "Running {} shard(s) on {} worker unit(s)",
            shard_ids.len(),
            assignments.len()
        );

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let mut shard_errors = Vec::new();
        let mut handles = Vec::with_capacity(assignments.len());

        for (unit, assigned) in assignments.into_iter().enumerate() {
            let (task_tx, task_rx) = mpsc::unbounded_channel();
            for shard_id in &assigned {
                if let Some(task) = tasks.remove(shard_id) {
                    let _ = task_tx.send(task);
                }
            }
            // Closing the task channel lets the unit exit once it is drained
            drop(task_tx);

            let context = UnitContext {
                unit,
                shard_ids: assigned.clone(),
                factory: self.factory.clone(),
                backend: self.backend.clone(),
                chunker: self.chunker.clone(),
                dimension: self.backend.dimension(),
                cancel: cancel.clone(),
                progress: progress.clone(),
            };
            match spawn_unit(context, task_rx, result_tx.clone()) {
                Ok(handle) => handles.push((unit, assigned, handle)),
                Err(e) => {
                    tracing::warn!("Failed to spawn worker unit {}: {}", unit, e);
                    shard_errors.extend(assigned.into_iter().map(|shard_id| {
                        ShardError::new(shard_id, format!("failed to spawn worker unit: {}", e))
                    }));
                }
            }
        }
        drop(result_tx);

        let mut messages = Vec::new();
        while let Some(message) = result_rx.recv().await {
            messages.push(message);
        }

        for (unit, assigned, handle) in handles {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!("Worker unit {} panicked", unit);
                shard_errors.extend(assigned.into_iter().map(|shard_id| {
                    ShardError::new(shard_id, format!("worker unit {} panicked", unit))
                }));
            }
        }

        (messages, shard_errors)
    }
}

fn spawn_unit(
    context: UnitContext,
    tasks: mpsc::UnboundedReceiver<UnitTask>,
    results: mpsc::UnboundedSender<UnitMessage>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("codeseek-unit-{}", context.unit))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    for &shard_id in &context.shard_ids {
                        let _ = results.send(UnitMessage::ShardFailed {
                            unit: context.unit,
                            shard_id,
                            error: format!("failed to start runtime: {}", e),
                        });
                    }
                    return;
                }
            };
            runtime.block_on(run_unit(context, tasks, results));
        })
}

async fn run_unit(
    context: UnitContext,
    mut tasks: mpsc::UnboundedReceiver<UnitTask>,
    results: mpsc::UnboundedSender<UnitMessage>,
) {
    let unit = context.unit;
    let mut stores: BTreeMap<usize, Arc<dyn ShardStore>> = BTreeMap::new();
    for &shard_id in &context.shard_ids {
        match context.factory.open(shard_id, context.dimension).await {
            Ok(store) => {
                stores.insert(shard_id, store);
            }
            Err(e) => {
                tracing::warn!("Unit {} failed to open shard {}: {:#}", unit, shard_id, e);
                let _ = results.send(UnitMessage::ShardFailed {
                    unit,
                    shard_id,
                    error: format!("{:#}", e),
                });
            }
        }
    }

    while let Some(task) = tasks.recv().await {
        // Shards that failed to open were already reported
        let Some(store) = stores.get(&task.shard_id()).cloned() else {
            continue;
        };
        match task {
            UnitTask::Index { shard_id, jobs } => {
                let writer =
                    ShardWriter::new(store, context.backend.clone(), context.chunker.clone());
                let mut files = 0;
                let mut chunks = 0;
                for job in jobs {
                    if context.cancel.is_cancelled() {
                        let _ = results.send(UnitMessage::Cancelled { unit, shard_id });
                        break;
                    }
                    let outcome = writer.process(job).await;
                    if let FileOutcome::Indexed { chunks: n, .. } = &outcome {
                        files += 1;
                        chunks += n;
                    }
                    if let Some(progress) = &context.progress {
                        let _ = progress.try_send(ProgressEvent::from_outcome(shard_id, &outcome));
                    }
                    let _ = results.send(UnitMessage::FileDone {
                        unit,
                        shard_id,
                        outcome,
                    });
                }
                if let Some(progress) = &context.progress {
                    let _ = progress.try_send(ProgressEvent::ShardFinished {
                        shard_id,
                        files,
                        chunks,
                    });
                }
            }
            UnitTask::Search {
                shard_id,
                vector,
                top_k,
                filter,
            } => {
                let message = match store.search(&vector, top_k, &filter).await {
                    Ok(hits) => UnitMessage::SearchHits {
                        unit,
                        shard_id,
                        results: hits,
                    },
                    Err(e) => UnitMessage::ShardFailed {
                        unit,
                        shard_id,
                        error: format!("{:#}", e),
                    },
                };
                let _ = results.send(message);
            }
        }
    }

    for store in stores.values() {
        store.dispose().await;
    }
}

#[cfg(test)]
mod tests;
