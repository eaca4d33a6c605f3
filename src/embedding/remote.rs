use super::{BackendKind, EmbeddingBackend, ProbeResult, check_batch};
use crate::error::EmbeddingError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ollama-compatible inference server
///
/// Only enabled when a server URL is configured. The vector size is learned from the first
/// embedding call during `initialize`.
pub struct RemoteBackend {
    client: Client,
    base_url: Option<String>,
    model: String,
    batch_size: usize,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl RemoteBackend {
    pub fn new(
        base_url: Option<String>,
        model: impl Into<String>,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build inference server HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            model: model.into(),
            batch_size: batch_size.max(1),
            dimension: 0,
        })
    }

    fn url(&self) -> Result<&str, EmbeddingError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| EmbeddingError::Unavailable {
                backend: BackendKind::Remote.to_string(),
                reason: "no inference server URL configured".to_string(),
            })
    }

    async fn embed_chunk(&self, url: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(format!("{}/api/embed", url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::GenerationFailed(format!("inference server timed out: {}", e))
                } else {
                    EmbeddingError::Unavailable {
                        backend: BackendKind::Remote.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::GenerationFailed(format!(
                "inference server returned {}: {}",
                status, body
            ))
            .into());
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("failed to parse inference server response")?;
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn probe(&self) -> ProbeResult {
        let Ok(url) = self.url() else {
            return ProbeResult::unavailable("no inference server URL configured");
        };
        match self
            .client
            .get(format!("{}/api/version", url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                ProbeResult::available(format!("inference server reachable at {}", url))
            }
            Ok(response) => ProbeResult::unavailable(format!(
                "inference server at {} answered {}",
                url,
                response.status()
            )),
            Err(e) => ProbeResult::unavailable(format!("inference server unreachable: {}", e)),
        }
    }

    async fn initialize(&mut self, cancel: &CancellationToken) -> Result<()> {
        let url = self.url()?.to_string();
        tracing::info!("Connecting to inference server {} ({})", url, self.model);

        let sample = vec!["dimension probe".to_string()];
        let vectors = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled.into()),
            result = self.embed_chunk(&url, &sample) => result.map_err(|e| {
                EmbeddingError::InitializationFailed {
                    backend: BackendKind::Remote.to_string(),
                    reason: format!("{:#}", e),
                }
            })?,
        };

        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if dimension == 0 {
            return Err(EmbeddingError::InitializationFailed {
                backend: BackendKind::Remote.to_string(),
                reason: "server returned an empty embedding".to_string(),
            }
            .into());
        }
        self.dimension = dimension;
        Ok(())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if self.dimension == 0 {
            return Err(EmbeddingError::NotInitialized.into());
        }
        let url = self.url()?;

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self.embed_chunk(url, chunk).await?;
            check_batch(&batch, chunk.len(), self.dimension)?;
            vectors.extend(batch);
        }
        Ok(vectors)
    }
}
