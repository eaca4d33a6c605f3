//! Store manifest (`store.json`)
//!
//! Records which embedding backend, model, vector size and shard count built a store. A store
//! is only reopened with the same identity; anything else needs a clear and rebuild.

use crate::error::{ConfigError, SeekError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "store.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    /// Backend identity, e.g. `local/all-MiniLM-L6-v2`
    pub backend: String,
    pub dimension: usize,
    pub shard_count: usize,
    /// RFC 3339 creation time
    pub created_at: String,
}

impl StoreManifest {
    pub fn new(backend: impl Into<String>, dimension: usize, shard_count: usize) -> Self {
        Self {
            backend: backend.into(),
            dimension,
            shard_count,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn path(store_dir: &Path) -> PathBuf {
        store_dir.join(MANIFEST_FILE)
    }

    /// Load the manifest, `None` when the store was never created
    pub fn load(store_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(store_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(manifest))
    }

    pub fn save(&self, store_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(store_dir)
            .with_context(|| format!("Failed to create {}", store_dir.display()))?;
        let path = Self::path(store_dir);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}d, {} shards)",
            self.backend, self.dimension, self.shard_count
        )
    }

    /// Fail unless `requested` matches the identity this store was built with
    pub fn ensure_compatible(&self, requested: &StoreManifest, store_dir: &Path) -> Result<(), SeekError> {
        if self.backend == requested.backend
            && self.dimension == requested.dimension
            && self.shard_count == requested.shard_count
        {
            return Ok(());
        }
        Err(ConfigError::StoreMismatch {
            path: store_dir.display().to_string(),
            existing: self.describe(),
            requested: requested.describe(),
        }
        .into())
    }
}
