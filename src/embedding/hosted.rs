use super::{BackendKind, EmbeddingBackend, ProbeResult, check_batch};
use crate::error::EmbeddingError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_RETRIES: usize = 3;

/// OpenAI-compatible hosted embeddings API
///
/// The API key is read from the configured environment variable at probe and initialize
/// time; it is never written to the configuration file. A disabled backend probes
/// unavailable even when the key is present.
pub struct HostedBackend {
    enabled: bool,
    base_url: String,
    model: String,
    api_key_env: String,
    batch_size: usize,
    timeout: Duration,
    client: Option<Client>,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl HostedBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_env: impl Into<String>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            enabled: true,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key_env: api_key_env.into(),
            batch_size: batch_size.max(1),
            timeout,
            client: None,
            dimension: 0,
        }
    }

    /// Whether the backend may be probed and used at all
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    fn build_client(&self, api_key: &str) -> Result<Client> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid hosted API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build hosted API HTTP client")
    }

    async fn embed_chunk(&self, client: &Client, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/embeddings", self.base_url);
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: texts,
            };
            match client.post(&endpoint).json(&request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp
                            .json()
                            .await
                            .context("failed to parse hosted embedding response")?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
                    }

                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < MAX_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::GenerationFailed(format!(
                        "hosted API request failed ({}): {}",
                        status, body
                    ))
                    .into());
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt + 1 < MAX_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    if err.is_timeout() {
                        return Err(EmbeddingError::Timeout(self.timeout.as_secs()).into());
                    }
                    return Err(EmbeddingError::Unavailable {
                        backend: BackendKind::Hosted.to_string(),
                        reason: err.to_string(),
                    }
                    .into());
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[async_trait]
impl EmbeddingBackend for HostedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn probe(&self) -> ProbeResult {
        if !self.enabled {
            return ProbeResult::unavailable("hosted embeddings are not enabled");
        }
        if self.api_key().is_some() {
            ProbeResult::available(format!("API key found in ${}", self.api_key_env))
        } else {
            ProbeResult::unavailable(format!("${} is not set", self.api_key_env))
        }
    }

    async fn initialize(&mut self, cancel: &CancellationToken) -> Result<()> {
        let api_key = self.api_key().ok_or_else(|| EmbeddingError::Unavailable {
            backend: BackendKind::Hosted.to_string(),
            reason: format!("${} is not set", self.api_key_env),
        })?;
        let client = self.build_client(&api_key)?;

        tracing::info!("Using hosted embeddings {} ({})", self.base_url, self.model);

        let sample = vec!["dimension probe".to_string()];
        let vectors = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled.into()),
            result = self.embed_chunk(&client, &sample) => result.map_err(|e| {
                EmbeddingError::InitializationFailed {
                    backend: BackendKind::Hosted.to_string(),
                    reason: format!("{:#}", e),
                }
            })?,
        };

        self.dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if self.dimension == 0 {
            return Err(EmbeddingError::InitializationFailed {
                backend: BackendKind::Hosted.to_string(),
                reason: "API returned an empty embedding".to_string(),
            }
            .into());
        }
        self.client = Some(client);
        Ok(())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let client = self.client.as_ref().ok_or(EmbeddingError::NotInitialized)?;

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self.embed_chunk(client, chunk).await?;
            check_batch(&batch, chunk.len(), self.dimension)?;
            vectors.extend(batch);
        }
        Ok(vectors)
    }

    async fn dispose(&self) {
        tracing::debug!("Hosted embedding backend released");
    }
}
