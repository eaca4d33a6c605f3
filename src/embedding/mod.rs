//! Embedding backends
//!
//! Every backend sits behind [`EmbeddingBackend`]. The concrete set is closed
//! ([`BackendKind`]) and ordered by [`BackendKind::PRIORITY`]; the selector walks that order
//! in `auto` mode.

mod fastembed_backend;
mod hashing;
mod hosted;
mod remote;
mod selector;

pub use fastembed_backend::FastEmbedBackend;
pub use hashing::HashingBackend;
pub use hosted::HostedBackend;
pub use remote::RemoteBackend;
pub use selector::{
    BackendChoice, SelectionPlan, build_candidates, plan_selection, select_backend,
    select_from_probes,
};

use crate::error::EmbeddingError;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// The closed set of embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process ONNX model (fastembed)
    Local,
    /// Ollama-compatible inference server
    Remote,
    /// OpenAI-compatible hosted API
    Hosted,
    /// Feature hashing, always available
    Cpu,
}

impl BackendKind {
    /// Probe order for automatic selection
    pub const PRIORITY: [BackendKind; 4] = [
        BackendKind::Local,
        BackendKind::Remote,
        BackendKind::Hosted,
        BackendKind::Cpu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
            BackendKind::Hosted => "hosted",
            BackendKind::Cpu => "cpu",
        }
    }

    /// Position in [`Self::PRIORITY`], lower is preferred
    pub fn priority(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|kind| kind == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a capability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub available: bool,
    /// Human-readable reason, logged by the selector
    pub detail: String,
}

impl ProbeResult {
    pub fn available(detail: impl Into<String>) -> Self {
        Self {
            available: true,
            detail: detail.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            detail: detail.into(),
        }
    }
}

/// Capability interface shared by all embedding backends
///
/// `probe` must be cheap and side-effect free. `initialize` may download model files or
/// contact a server and honours `cancel`. `embed_batch` returns exactly one vector per input,
/// in input order, each of length [`dimension`](Self::dimension).
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn model_name(&self) -> &str;

    /// Vector length; only meaningful after a successful `initialize`
    fn dimension(&self) -> usize;

    async fn probe(&self) -> ProbeResult;

    async fn initialize(&mut self, cancel: &CancellationToken) -> Result<()>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationFailed("empty response".to_string()).into())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Release model memory or connections
    async fn dispose(&self) {}

    /// Identity recorded in the store manifest, e.g. `local/all-MiniLM-L6-v2`
    fn identity(&self) -> String {
        format!("{}/{}", self.kind(), self.model_name())
    }
}

/// Check count and length of a backend response
pub(crate) fn check_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}
