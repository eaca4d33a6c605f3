use super::{BackendKind, EmbeddingBackend, ProbeResult, check_batch};
use crate::error::EmbeddingError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Local ONNX embedding model through fastembed
///
/// Model files are downloaded into `cache_dir` on first initialization and reused offline
/// afterwards. `TextEmbedding::embed` needs `&mut self`, so the model sits behind a mutex and
/// every call runs on the blocking pool.
pub struct FastEmbedBackend {
    model_name: String,
    cache_dir: PathBuf,
    batch_size: usize,
    timeout: Duration,
    dimension: usize,
    model: Arc<Mutex<Option<TextEmbedding>>>,
}

/// Supported model names and their vector sizes
fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    let lowered = name.to_lowercase();
    let short = lowered.rsplit('/').next().unwrap_or(&lowered);
    match short {
        "all-minilm-l6-v2" => Some((EmbeddingModel::AllMiniLML6V2, 384)),
        "all-minilm-l12-v2" => Some((EmbeddingModel::AllMiniLML12V2, 384)),
        "bge-small-en-v1.5" => Some((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Some((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Some((EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Some((EmbeddingModel::NomicEmbedTextV15, 768)),
        _ => None,
    }
}

impl FastEmbedBackend {
    pub fn new(
        model_name: impl Into<String>,
        cache_dir: PathBuf,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            cache_dir,
            batch_size: batch_size.max(1),
            timeout,
            dimension: 0,
            model: Arc::new(Mutex::new(None)),
        }
    }

    fn is_cached(&self) -> bool {
        std::fs::read_dir(&self.cache_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl EmbeddingBackend for FastEmbedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn probe(&self) -> ProbeResult {
        if resolve_model(&self.model_name).is_none() {
            return ProbeResult::unavailable(format!(
                "unsupported local model '{}'",
                self.model_name
            ));
        }
        if let Err(e) = std::fs::create_dir_all(&self.cache_dir) {
            return ProbeResult::unavailable(format!(
                "model cache {} is not writable: {}",
                self.cache_dir.display(),
                e
            ));
        }
        if self.is_cached() {
            ProbeResult::available("model cache present")
        } else {
            ProbeResult::available("model will be downloaded on first use")
        }
    }

    async fn initialize(&mut self, cancel: &CancellationToken) -> Result<()> {
        let (model, dimension) = resolve_model(&self.model_name).ok_or_else(|| {
            EmbeddingError::InitializationFailed {
                backend: self.kind().to_string(),
                reason: format!("unsupported model '{}'", self.model_name),
            }
        })?;

        tracing::info!(
            "Initializing FastEmbed model {} (cache: {})",
            self.model_name,
            self.cache_dir.display()
        );

        let options = InitOptions::new(model)
            .with_cache_dir(self.cache_dir.clone())
            .with_show_download_progress(false);

        let load = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options));
        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled.into()),
            joined = load => joined.context("FastEmbed loader panicked")?,
        };
        let embedding = loaded.map_err(|e| EmbeddingError::InitializationFailed {
            backend: BackendKind::Local.to_string(),
            reason: e.to_string(),
        })?;

        *self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("FastEmbed model lock poisoned"))? = Some(embedding);
        self.dimension = dimension;
        Ok(())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let count = texts.len();
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let task = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = model
                .lock()
                .map_err(|_| anyhow::anyhow!("FastEmbed model lock poisoned"))?;
            let model = guard.as_mut().ok_or(EmbeddingError::NotInitialized)?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbeddingError::GenerationFailed(e.to_string()).into())
        });

        let vectors = tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout.as_secs()))?
            .context("FastEmbed worker panicked")??;

        check_batch(&vectors, count, self.dimension)?;
        Ok(vectors)
    }

    async fn dispose(&self) {
        if let Ok(mut guard) = self.model.lock() {
            guard.take();
        }
    }
}
