/// Centralized platform-specific path computation
///
/// Data, cache and config directories come from the `dirs` crate, which follows the XDG
/// Base Directory specification on Linux and the platform conventions elsewhere.
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

const APP_DIR: &str = "codeseek";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Data directory for the current platform, falling back to the working directory
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Cache directory for the current platform
    pub fn cache_dir() -> PathBuf {
        dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Config directory for the current platform
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Returns: {data_dir}/codeseek
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(APP_DIR)
    }

    /// Returns: {cache_dir}/codeseek
    pub fn project_cache_dir() -> PathBuf {
        Self::cache_dir().join(APP_DIR)
    }

    /// Returns: {config_dir}/codeseek
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(APP_DIR)
    }

    /// Default store directory when no project root is known
    ///
    /// Returns: {data_dir}/codeseek/stores/default
    pub fn default_store_path() -> PathBuf {
        Self::project_data_dir().join("stores").join("default")
    }

    /// Store directory dedicated to one project root
    ///
    /// Returns: {data_dir}/codeseek/stores/{first 16 hex chars of sha256(root)}
    pub fn store_path_for_project(project_root: &Path) -> PathBuf {
        let root = Self::resolve(project_root);
        let mut hasher = Sha256::new();
        hasher.update(root.to_string_lossy().as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Self::project_data_dir().join("stores").join(&hash[..16])
    }

    /// Returns: {cache_dir}/codeseek/models
    pub fn default_model_cache_dir() -> PathBuf {
        Self::project_cache_dir().join("models")
    }

    /// Returns: {config_dir}/codeseek/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }

    /// Resolve a path to an absolute form without requiring it to exist
    ///
    /// `.` and `..` are folded lexically, then the deepest existing ancestor is
    /// canonicalized and the missing tail re-appended. The result for a directory is the
    /// same before and after it is created.
    pub fn resolve(path: &Path) -> PathBuf {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut normalized = PathBuf::new();
        for component in absolute.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other),
            }
        }

        let mut missing = Vec::new();
        let mut existing = normalized.as_path();
        loop {
            if let Ok(mut resolved) = std::fs::canonicalize(existing) {
                resolved.extend(missing.iter().rev());
                return resolved;
            }
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return normalized,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_project_dirs_use_app_name() {
        assert!(PlatformPaths::project_data_dir().ends_with("codeseek"));
        assert!(PlatformPaths::project_cache_dir().ends_with("codeseek"));
        assert!(PlatformPaths::project_config_dir().ends_with("codeseek"));
    }

    #[test]
    fn test_default_config_path() {
        let path = PlatformPaths::default_config_path();
        assert!(path.ends_with("codeseek/config.toml"));
    }

    #[test]
    fn test_store_path_for_project_is_stable() {
        let dir = TempDir::new().unwrap();
        let first = PlatformPaths::store_path_for_project(dir.path());
        let second = PlatformPaths::store_path_for_project(dir.path());
        assert_eq!(first, second);
        assert_eq!(first.file_name().unwrap().len(), 16);
    }

    #[test]
    fn test_store_path_differs_per_project() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        assert_ne!(
            PlatformPaths::store_path_for_project(a.path()),
            PlatformPaths::store_path_for_project(b.path())
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let resolved = PlatformPaths::resolve(Path::new("does-not-exist/child"));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("does-not-exist/child"));
    }

    #[test]
    fn test_resolve_existing_path_canonicalizes() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a");
        std::fs::create_dir(&nested).unwrap();
        let dotted = nested.join("..").join("a");
        assert_eq!(
            PlatformPaths::resolve(&dotted),
            std::fs::canonicalize(&nested).unwrap()
        );
    }

    #[test]
    fn test_resolve_is_stable_across_creation() {
        let dir = TempDir::new().unwrap();
        let dotted = dir.path().join("x").join("..").join("store");
        let before = PlatformPaths::resolve(&dotted);

        std::fs::create_dir_all(dir.path().join("store")).unwrap();
        let after = PlatformPaths::resolve(&dotted);

        assert_eq!(before, after);
        assert_eq!(after, std::fs::canonicalize(dir.path().join("store")).unwrap());
    }
}
