//! # codeseek - sharded semantic code search
//!
//! A local code search engine that answers natural-language questions about a codebase.
//! Files are split into syntax-aware chunks, embedded by the best available backend and
//! stored in a fixed number of shards; queries fan out to every shard in parallel and are
//! merged into one global ranking.
//!
//! The crate is both a library and an MCP server (`codeseek` binary, stdio transport).
//!
//! ## Key Features
//!
//! - **Syntax-aware chunking**: tree-sitter grammars for 12 languages, Markdown heading
//!   sections, and a line-aligned sliding window for everything else
//! - **Backend fallback**: local ONNX model, Ollama-compatible server, OpenAI-compatible
//!   hosted API, or a CPU feature-hashing fallback that works offline
//! - **Sharding**: deterministic file-to-shard assignment, one LanceDB table per shard
//! - **Worker pool**: one OS thread per group of shards for indexing and search
//! - **Incremental indexing**: persistent content hashes skip unchanged files
//!
//! ## Architecture
//!
//! ```text
//!   MCP client ──stdio──▶ CodeSeekMcpServer
//!                              │
//!                        SearchService (per store path, via ServiceRegistry)
//!                        │            │             │
//!                     Indexer      Searcher     WorkerPool ──▶ units (threads)
//!                        │            │             │
//!               EmbeddingBackend   ShardStore × N  (LanceDB or memory)
//! ```
//!
//! ## Modules
//!
//! - [`service`]: lifecycle façade and per-store registry
//! - [`indexer`]: file walking, language detection, chunking, shard writes
//! - [`searcher`]: query embedding, fan-out and global merge
//! - [`worker_pool`]: thread-per-unit execution of shard-local work
//! - [`embedding`]: backend trait, the four backends and selection
//! - [`vector_db`]: shard store trait, LanceDB and memory stores, store manifest
//! - [`mcp_server`]: MCP tools and prompts
//! - [`cache`]: persistent content-hash table
//! - [`fs_lock`]: cross-process lock on a store directory
//! - [`config`], [`paths`], [`types`], [`error`]
//!
//! ## Usage Example
//!
//! ```no_run
//! use codeseek::config::Config;
//! use codeseek::service::ServiceRegistry;
//! use codeseek::vector_db::SearchFilter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ServiceRegistry::new();
//!     let service = registry.get_instance(Config::for_project(std::path::Path::new(".")))?;
//!     service.initialize().await?;
//!
//!     service.index_file("src/main.rs", None).await?;
//!     let options = service.search_options(Some(5), None, SearchFilter::default())?;
//!     for result in service.search("where is the entry point", &options).await?.results {
//!         println!("{} ({:.2})", result.file_path, result.similarity_score);
//!     }
//!
//!     service.dispose().await;
//!     Ok(())
//! }
//! ```

/// Persistent content-hash table for incremental indexing
pub mod cache;

/// Configuration management with environment variable overrides
pub mod config;

/// Embedding backends and capability-based selection
pub mod embedding;

/// Error types and utilities
pub mod error;

/// Exclusive lock on a store directory
pub mod fs_lock;

/// File walking, code chunking, and AST parsing
pub mod indexer;

/// MCP server implementation with tools and prompts
pub mod mcp_server;

/// Platform directories and path normalization
pub mod paths;

/// Query fan-out and global ranking
pub mod searcher;

/// Service lifecycle and per-store registry
pub mod service;

/// MCP request/response types with JSON schema definitions
pub mod types;

/// Shard stores (LanceDB and in-memory)
pub mod vector_db;

/// Thread-per-unit execution of shard-local work
pub mod worker_pool;

#[cfg(test)]
mod test_support;
