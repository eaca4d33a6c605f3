use anyhow::{Context, Result};
use clap::Parser;
use codeseek::config::Config;
use codeseek::mcp_server::CodeSeekMcpServer;
use codeseek::paths::PlatformPaths;
use codeseek::service::SearchService;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CODESEEK_GIT_HASH"),
    ", built ",
    env!("CODESEEK_BUILD_DATE"),
    ")"
);

/// Sharded semantic code search, served as MCP tools over stdio
#[derive(Parser, Debug)]
#[command(name = "codeseek", version, long_version = LONG_VERSION)]
struct Cli {
    /// Configuration file (default: {config_dir}/codeseek/config.toml)
    #[arg(long, env = "CODESEEK_CONFIG")]
    config: Option<PathBuf>,

    /// Project root; selects a store dedicated to this project
    #[arg(long)]
    project: Option<PathBuf>,

    /// Store directory, overriding --project
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Embedding backend: auto, local, remote, hosted or cpu
    #[arg(long)]
    backend: Option<String>,

    /// Number of shards for a new store
    #[arg(long)]
    shards: Option<usize>,

    /// Worker units; derived from available parallelism when unset
    #[arg(long)]
    workers: Option<usize>,

    /// Delete the store before serving, e.g. after switching backends
    #[arg(long)]
    rebuild: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Config file, then environment, then flags
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::load_or_default()?,
        };
        config.apply_env_overrides();

        if let Some(project) = &self.project {
            config.store.path = PlatformPaths::store_path_for_project(project);
        }
        if let Some(path) = &self.store_path {
            config.store.path = path.clone();
        }
        if let Some(backend) = &self.backend {
            config.embedding.backend = backend.clone();
        }
        if let Some(shards) = self.shards {
            config.store.shard_count = shards;
        }
        if let Some(workers) = self.workers {
            config.pool.worker_count = Some(workers);
        }
        config.verbose |= self.verbose;

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("Invalid configuration")?;
    init_tracing(config.verbose);

    tracing::info!(
        "codeseek {} using store {}",
        LONG_VERSION,
        config.store.path.display()
    );

    if cli.rebuild {
        SearchService::purge_store(&config.store.path)?;
    }

    CodeSeekMcpServer::serve_stdio(config).await
}
