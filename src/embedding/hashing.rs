use super::{BackendKind, EmbeddingBackend, ProbeResult};
use anyhow::Result;
use async_trait::async_trait;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

const MODEL_NAME: &str = "feature-hashing";

/// CPU fallback: deterministic feature hashing over identifier-aware tokens
///
/// Identifiers are split on snake_case and camelCase boundaries so `parseConfig` and
/// `parse_config` share features. Vectors carry only non-negative weights and are L2
/// normalized, so cosine similarity between any two of them lies in `[0, 1]`.
pub struct HashingBackend {
    dimension: usize,
}

impl HashingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed one text synchronously
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let tokens = tokenize(text);
        for token in &tokens {
            let slot = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }
        // Adjacent token pairs add a little word-order signal
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            let slot = (fnv1a(joined.as_bytes()) % self.dimension as u64) as usize;
            vector[slot] += 0.5;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Lowercased word tokens, with identifiers split into their parts
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let parts = split_identifier(word);
        if parts.len() > 1 {
            tokens.push(word.to_lowercase());
        }
        tokens.extend(parts);
    }
    tokens
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in word.chars() {
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(current.to_lowercase());
            current.clear();
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current.to_lowercase());
    }
    parts
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn probe(&self) -> ProbeResult {
        ProbeResult::available("always available")
    }

    async fn initialize(&mut self, _cancel: &CancellationToken) -> Result<()> {
        tracing::info!("Using CPU feature-hashing embeddings ({}d)", self.dimension);
        Ok(())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        // rayon keeps input order on collect
        Ok(texts.par_iter().map(|text| self.embed_text(text)).collect())
    }
}
