//! File walking functionality for directory traversal

use super::language::{detect_from_file_name, detect_language};
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Directory names never descended into
pub const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    ".git",
    "__pycache__",
    ".venv",
    "venv",
    "coverage",
    ".next",
    "out",
];

/// Bytes inspected by the binary check
const SNIFF_LEN: usize = 8192;

pub struct FileWalker {
    pub(crate) root: PathBuf,
    pub(crate) max_file_size: usize,
    pub(crate) include_patterns: Vec<String>,
    pub(crate) exclude_patterns: Vec<String>,
    cancel: Option<CancellationToken>,
}

impl FileWalker {
    pub fn new(root: impl AsRef<Path>, max_file_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size,
            include_patterns: vec![],
            exclude_patterns: vec![],
            cancel: None,
        }
    }

    /// Stop the walk early once the token is cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_patterns(
        mut self,
        include_patterns: Vec<String>,
        exclude_patterns: Vec<String>,
    ) -> Self {
        self.include_patterns = include_patterns;
        self.exclude_patterns = exclude_patterns;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Walk the directory and collect every eligible file, sorted by path
    ///
    /// A cancelled walk returns the files found so far.
    pub fn walk(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            anyhow::bail!("Root directory does not exist: {:?}", self.root);
        }
        if !self.root.is_dir() {
            anyhow::bail!("Root path is not a directory: {:?}", self.root);
        }

        let include = compile_globs(&self.include_patterns)?;
        let exclude = compile_globs(&self.exclude_patterns)?;

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(true) // .gitignore, .ignore, hidden files
            .require_git(false)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && entry.depth() > 0 && is_skipped_dir(entry.file_name()))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            if self.is_cancelled() {
                tracing::info!("File walk cancelled after {} files", files.len());
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();

            if !has_indexable_name(path) {
                continue;
            }

            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            if !matches_patterns(relative, include.as_ref(), exclude.as_ref()) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) if metadata.len() > self.max_file_size as u64 => {
                    tracing::debug!("Skipping large file: {:?}", path);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            }

            match is_text_file(path) {
                Ok(true) => files.push(path.to_path_buf()),
                Ok(false) => tracing::debug!("Skipping binary file: {:?}", path),
                Err(e) => tracing::debug!("Skipping {:?}: {:#}", path, e),
            }
        }

        files.sort();
        tracing::info!("Found {} files to index under {:?}", files.len(), self.root);
        Ok(files)
    }
}

fn is_skipped_dir(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| SKIPPED_DIRS.contains(&n))
}

/// Source and text files the chunker knows a language for
pub(crate) fn has_indexable_name(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        return detect_language(ext).is_some();
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(detect_from_file_name)
        .is_some()
}

fn compile_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob '{}'", pattern))?);
        // "src/**" should also match "nested/src/x.rs"
        if !pattern.starts_with("**/") && !pattern.starts_with('/') {
            builder.add(Glob::new(&format!("**/{}", pattern))?);
        }
    }
    Ok(Some(builder.build()?))
}

/// Include patterns must match when given; exclude patterns must not
pub(crate) fn matches_patterns(
    relative: &Path,
    include: Option<&GlobSet>,
    exclude: Option<&GlobSet>,
) -> bool {
    if let Some(include) = include
        && !include.is_match(relative)
    {
        return false;
    }
    !exclude.is_some_and(|exclude| exclude.is_match(relative))
}

/// Check if a file is likely text (not binary) from its first bytes
pub(crate) fn is_text_file(path: &Path) -> Result<bool> {
    let mut file = File::open(path).context("Failed to open file")?;
    let mut buf = vec![0u8; SNIFF_LEN];
    let read = file.read(&mut buf).context("Failed to read file")?;
    let head = &buf[..read];

    if head.is_empty() {
        return Ok(true);
    }
    if head.contains(&0) {
        return Ok(false);
    }

    // More than 30% control bytes reads as binary
    let non_printable = head
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();
    Ok((non_printable as f64 / head.len() as f64) < 0.3)
}
