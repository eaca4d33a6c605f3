//! Backend selection: capability probing in priority order with fallback

use super::{
    BackendKind, EmbeddingBackend, FastEmbedBackend, HashingBackend, HostedBackend, ProbeResult,
    RemoteBackend,
};
use crate::config::Config;
use crate::error::{ConfigError, EmbeddingError, SeekError};
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Requested backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// Probe in priority order and take the first that initializes
    #[default]
    Auto,
    /// Use exactly this backend or fail
    Explicit(BackendKind),
}

impl FromStr for BackendChoice {
    type Err = SeekError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "local" | "fastembed" => Ok(BackendChoice::Explicit(BackendKind::Local)),
            "remote" | "ollama" => Ok(BackendChoice::Explicit(BackendKind::Remote)),
            "hosted" | "openai" => Ok(BackendChoice::Explicit(BackendKind::Hosted)),
            "cpu" => Ok(BackendChoice::Explicit(BackendKind::Cpu)),
            other => Err(ConfigError::UnknownBackend(other.to_string()).into()),
        }
    }
}

/// Initialization order derived from probe results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    pub order: Vec<BackendKind>,
    /// Backends left out, with the probe detail
    pub skipped: Vec<(BackendKind, String)>,
}

/// Decide which backends to try, in order, from a set of probe results
///
/// Auto mode keeps every available backend sorted by priority. An explicit choice yields
/// exactly that backend, or a configuration error when its probe failed or it was never
/// probed.
pub fn plan_selection(
    choice: BackendChoice,
    probes: &[(BackendKind, ProbeResult)],
) -> Result<SelectionPlan, SeekError> {
    match choice {
        BackendChoice::Auto => {
            let mut sorted: Vec<&(BackendKind, ProbeResult)> = probes.iter().collect();
            sorted.sort_by_key(|(kind, _)| kind.priority());

            let mut plan = SelectionPlan {
                order: Vec::new(),
                skipped: Vec::new(),
            };
            for (kind, probe) in sorted {
                if probe.available {
                    plan.order.push(*kind);
                } else {
                    plan.skipped.push((*kind, probe.detail.clone()));
                }
            }
            Ok(plan)
        }
        BackendChoice::Explicit(requested) => {
            match probes.iter().find(|(kind, _)| *kind == requested) {
                Some((_, probe)) if probe.available => Ok(SelectionPlan {
                    order: vec![requested],
                    skipped: Vec::new(),
                }),
                Some((_, probe)) => Err(ConfigError::BackendUnavailable {
                    backend: requested.to_string(),
                    reason: probe.detail.clone(),
                }
                .into()),
                None => Err(ConfigError::BackendUnavailable {
                    backend: requested.to_string(),
                    reason: "backend is not configured".to_string(),
                }
                .into()),
            }
        }
    }
}

/// First backend the plan would initialize
pub fn select_from_probes(
    choice: BackendChoice,
    probes: &[(BackendKind, ProbeResult)],
) -> Result<BackendKind, SeekError> {
    plan_selection(choice, probes)?
        .order
        .first()
        .copied()
        .ok_or_else(|| {
            EmbeddingError::Unavailable {
                backend: "auto".to_string(),
                reason: "no embedding backend is available".to_string(),
            }
            .into()
        })
}

/// Every backend the configuration can describe, in priority order
///
/// The hosted API only probes available when `embedding.hosted_enabled` is set or it is the
/// explicitly requested backend, so auto mode never sends code off the machine on its own.
pub fn build_candidates(config: &Config) -> anyhow::Result<Vec<Box<dyn EmbeddingBackend>>> {
    let embedding = &config.embedding;
    let timeout = Duration::from_secs(embedding.timeout_secs);
    let hosted_requested = matches!(
        config.backend_choice(),
        Ok(BackendChoice::Explicit(BackendKind::Hosted))
    );
    Ok(vec![
        Box::new(FastEmbedBackend::new(
            embedding.model_name.clone(),
            embedding.cache_dir.clone(),
            embedding.batch_size,
            timeout,
        )),
        Box::new(RemoteBackend::new(
            embedding.remote_url.clone(),
            embedding.remote_model.clone(),
            embedding.batch_size,
            timeout,
        )?),
        Box::new(HostedBackend::new(
            embedding.hosted_url.clone(),
            embedding.hosted_model.clone(),
            embedding.hosted_api_key_env.clone(),
            embedding.batch_size,
            timeout,
        )
        .with_enabled(embedding.hosted_enabled || hosted_requested)),
        Box::new(HashingBackend::new(embedding.cpu_dimension)),
    ])
}

/// Probe and initialize candidates in priority order
///
/// Each candidate is probed only when every higher-priority one was skipped or failed. In
/// auto mode an unavailable or failing backend falls through to the next one; an explicit
/// choice fails with a configuration error instead. Cancellation aborts the whole selection.
pub async fn select_backend(
    candidates: Vec<Box<dyn EmbeddingBackend>>,
    choice: BackendChoice,
    cancel: &CancellationToken,
) -> Result<Box<dyn EmbeddingBackend>, SeekError> {
    let mut candidates = candidates;
    candidates.sort_by_key(|backend| backend.kind().priority());
    if let BackendChoice::Explicit(kind) = choice {
        candidates.retain(|backend| backend.kind() == kind);
        if candidates.is_empty() {
            return Err(ConfigError::BackendUnavailable {
                backend: kind.to_string(),
                reason: "backend is not configured".to_string(),
            }
            .into());
        }
    }

    let mut last_error = None;
    for mut backend in candidates {
        if cancel.is_cancelled() {
            return Err(EmbeddingError::Cancelled.into());
        }
        let kind = backend.kind();

        let probe = backend.probe().await;
        tracing::debug!("Probe {}: available={} ({})", kind, probe.available, probe.detail);
        if !probe.available {
            if let BackendChoice::Explicit(_) = choice {
                return Err(ConfigError::BackendUnavailable {
                    backend: kind.to_string(),
                    reason: probe.detail,
                }
                .into());
            }
            tracing::info!("Skipping {} embedding backend: {}", kind, probe.detail);
            continue;
        }

        match backend.initialize(cancel).await {
            Ok(()) => {
                tracing::info!(
                    "Selected {} embedding backend ({}, {}d)",
                    kind,
                    backend.model_name(),
                    backend.dimension()
                );
                return Ok(backend);
            }
            Err(e) => {
                let err = SeekError::from(e);
                if matches!(err, SeekError::Embedding(EmbeddingError::Cancelled)) {
                    return Err(err);
                }
                if let BackendChoice::Explicit(_) = choice {
                    return Err(ConfigError::BackendUnavailable {
                        backend: kind.to_string(),
                        reason: err.to_string(),
                    }
                    .into());
                }
                tracing::warn!("{} embedding backend failed to initialize: {}", kind, err);
                last_error = Some(err);
            }
        }
    }

    Err(EmbeddingError::Unavailable {
        backend: "auto".to_string(),
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no embedding backend is available".to_string()),
    }
    .into())
}
