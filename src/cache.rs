use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File name of the hash table inside a store directory
pub const HASH_TABLE_FILE: &str = "file_hashes.json";

/// SHA-256 of file content, hex encoded
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content hash of the last successfully indexed version of each file
///
/// A path present here is assumed to have matching chunks in its shard. Entries are only
/// inserted after the shard write succeeded and are evicted when a write fails.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileHashTable {
    /// Map of file path -> content hash
    pub files: BTreeMap<String, String>,
}

impl FileHashTable {
    /// Load the table from disk, empty when the file does not exist
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            tracing::debug!("Hash table not found, starting empty");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| CacheError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let table: FileHashTable =
            serde_json::from_str(&content).map_err(|e| CacheError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!("Loaded hash table with {} files", table.files.len());
        Ok(table)
    }

    /// Save to disk through a temporary file and rename
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let failed = |reason: String| CacheError::SaveFailed {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| failed(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| failed(e.to_string()))?;

        tracing::debug!("Saved hash table to {:?}", path);
        Ok(())
    }

    pub fn get(&self, file_path: &str) -> Option<&str> {
        self.files.get(file_path).map(String::as_str)
    }

    /// True when `hash` equals the stored hash for the file
    pub fn is_unchanged(&self, file_path: &str, hash: &str) -> bool {
        self.get(file_path) == Some(hash)
    }

    pub fn insert(&mut self, file_path: impl Into<String>, hash: impl Into<String>) {
        self.files.insert(file_path.into(), hash.into());
    }

    pub fn remove(&mut self, file_path: &str) -> Option<String> {
        self.files.remove(file_path)
    }

    /// Indexed paths below a directory prefix
    pub fn paths_under(&self, root: &str) -> Vec<String> {
        let prefix = if root.ends_with(std::path::MAIN_SEPARATOR) {
            root.to_string()
        } else {
            format!("{}{}", root, std::path::MAIN_SEPARATOR)
        };
        self.files
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}
