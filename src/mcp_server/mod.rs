use crate::config::Config;
use crate::error::SeekResult;
use crate::paths::PlatformPaths;
use crate::service::{SearchService, ServiceRegistry, ServiceState};
use crate::types::*;
use crate::vector_db::SearchFilter;
use crate::worker_pool::ProgressEvent;

use anyhow::{Context, Result};
use rmcp::{
    ErrorData as McpError, Peer, RoleServer, ServerHandler, ServiceExt,
    handler::server::{router::prompt::PromptRouter, tool::ToolRouter, wrapper::Parameters},
    model::*,
    prompt, prompt_handler, prompt_router,
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Progress events buffered between the worker units and the notification task
const PROGRESS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct CodeSeekMcpServer {
    service: Arc<SearchService>,
    /// Cancelled when the server shuts down; running batches stop taking new files
    shutdown: CancellationToken,
    tool_router: ToolRouter<Self>,
    prompt_router: PromptRouter<Self>,
}

impl CodeSeekMcpServer {
    /// Create a server for the configured store and initialize its service
    pub async fn new(config: Config, registry: &ServiceRegistry) -> Result<Self> {
        let service = registry.get_instance(config)?;
        service
            .initialize()
            .await
            .context("Failed to initialize search service")?;
        Ok(Self::with_service(service))
    }

    /// Create a server around an existing service
    pub fn with_service(service: Arc<SearchService>) -> Self {
        Self {
            service,
            shutdown: CancellationToken::new(),
            tool_router: Self::tool_router(),
            prompt_router: Self::prompt_router(),
        }
    }

    pub fn service(&self) -> &SearchService {
        &self.service
    }

    pub async fn run_semantic_search(
        &self,
        req: SemanticSearchRequest,
    ) -> SeekResult<SemanticSearchResponse> {
        let start = Instant::now();
        let filter = SearchFilter {
            languages: req.languages,
            extensions: req.extensions,
            path_prefix: req.path_prefix,
        };
        let options = self.service.search_options(req.limit, req.threshold, filter)?;
        let outcome = self.service.search(&req.query, &options).await?;

        Ok(SemanticSearchResponse {
            matches: outcome.results.into_iter().map(to_match).collect(),
            shard_errors: outcome.shard_errors,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn run_index_status(&self) -> IndexStatusResponse {
        let (state, stats) = self.service.get_status().await;
        let stats = stats.unwrap_or(IndexStats {
            total_files: 0,
            total_chunks: 0,
            database_size_bytes: 0,
            last_indexed_at: None,
            shard_count: self.service.config().store.shard_count,
            language_breakdown: Vec::new(),
        });
        IndexStatusResponse {
            ready: state == ServiceState::Ready,
            state: state.to_string(),
            backend: self.service.backend_identity().await,
            total_files: stats.total_files,
            total_chunks: stats.total_chunks,
            database_size_bytes: stats.database_size_bytes,
            last_indexed_at: stats.last_indexed_at,
            language_breakdown: stats.language_breakdown,
        }
    }

    pub async fn run_index_directory(
        &self,
        req: IndexDirectoryRequest,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> SeekResult<IndexDirectoryResponse> {
        let cancel = self.shutdown.child_token();
        self.service.index_directory(&req, &cancel, progress).await
    }

    pub async fn run_index_file(&self, req: IndexFileRequest) -> SeekResult<IndexFileResponse> {
        let path = match &req.content {
            Some(_) => req.path.clone(),
            None => PlatformPaths::resolve(Path::new(&req.path))
                .to_string_lossy()
                .into_owned(),
        };
        let chunks_written = self.service.index_file(&path, req.content).await?;
        Ok(IndexFileResponse {
            path,
            chunks_written,
        })
    }

    pub async fn run_clear_index(&self) -> SeekResult<ClearIndexResponse> {
        self.service.clear().await?;
        Ok(ClearIndexResponse {
            success: true,
            message: "Cleared every shard and the content-hash table".to_string(),
        })
    }

    /// Stop running batches and release the service
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.service.dispose().await;
    }
}

/// Map a language name to a Markdown fence tag
pub fn fence_tag(language: &str) -> String {
    match language {
        "C++" | "C/C++ Header" => "cpp".to_string(),
        "C#" => "csharp".to_string(),
        "TypeScript (TSX)" => "tsx".to_string(),
        "JavaScript (JSX)" => "jsx".to_string(),
        "Shell" => "bash".to_string(),
        "Text" => String::new(),
        other => other.to_lowercase().replace(' ', ""),
    }
}

fn to_match(result: SearchResult) -> SearchMatch {
    let excerpt = format!(
        "```{}\n{}\n```",
        fence_tag(&result.metadata.language),
        result.content.trim_end()
    );
    SearchMatch {
        file_path: result.file_path,
        start_line: result.metadata.start_line,
        end_line: result.metadata.end_line,
        function_name: result.metadata.function_name,
        language: result.metadata.language,
        similarity_score: result.similarity_score,
        excerpt,
    }
}

/// Fatal errors become tool errors; any other failure is reported inside the JSON result
fn respond<T: serde::Serialize>(result: SeekResult<T>) -> Result<String, String> {
    match result {
        Ok(response) => to_json(&response),
        Err(err) if err.is_fatal() => Err(err.to_user_string()),
        Err(err) => {
            tracing::warn!("Tool call failed: {}", err);
            to_json(&ToolFailureResponse {
                error: err.to_user_string(),
                retryable: err.is_retryable(),
            })
        }
    }
}

fn to_json<T: serde::Serialize>(response: &T) -> Result<String, String> {
    serde_json::to_string_pretty(response).map_err(|e| format!("Serialization failed: {}", e))
}

/// Forward pool progress to the client as MCP progress notifications
fn forward_progress(
    peer: Peer<RoleServer>,
    token: ProgressToken,
) -> (mpsc::Sender<ProgressEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(PROGRESS_CAPACITY);
    let task = tokio::spawn(async move {
        let mut files = 0u64;
        while let Some(event) = rx.recv().await {
            let message = match &event {
                ProgressEvent::FileIndexed {
                    file_path, chunks, ..
                } => {
                    files += 1;
                    format!("Indexed {} ({} chunks)", file_path, chunks)
                }
                ProgressEvent::FileFailed {
                    file_path, error, ..
                } => {
                    files += 1;
                    format!("Failed {}: {}", file_path, error)
                }
                ProgressEvent::ShardFinished {
                    shard_id,
                    files: done,
                    ..
                } => format!("Shard {} finished {} files", shard_id, done),
            };
            let _ = peer
                .notify_progress(ProgressNotificationParam {
                    progress_token: token.clone(),
                    progress: files as f64,
                    total: None,
                    message: Some(message),
                })
                .await;
        }
    });
    (tx, task)
}

#[tool_router(router = tool_router)]
impl CodeSeekMcpServer {
    #[tool(
        description = "Search the indexed code with a natural-language query. Returns the best matching chunks with file path, line range, symbol name, similarity score and a code excerpt."
    )]
    async fn semantic_search(
        &self,
        Parameters(req): Parameters<SemanticSearchRequest>,
    ) -> Result<String, String> {
        respond(self.run_semantic_search(req).await)
    }

    #[tool(description = "Report whether the index is ready and how many files and chunks it holds")]
    async fn index_status(
        &self,
        Parameters(_req): Parameters<IndexStatusRequest>,
    ) -> Result<String, String> {
        to_json(&self.run_index_status().await)
    }

    #[tool(
        description = "Index every source file under a directory. Unchanged files are skipped and files deleted since the last run are removed from the index."
    )]
    async fn index_directory(
        &self,
        meta: Meta,
        peer: Peer<RoleServer>,
        Parameters(req): Parameters<IndexDirectoryRequest>,
    ) -> Result<String, String> {
        let (progress, forwarder) = match meta.get_progress_token() {
            Some(token) => {
                let (tx, task) = forward_progress(peer, token);
                (Some(tx), Some(task))
            }
            None => (None, None),
        };

        let response = self.run_index_directory(req, progress).await;
        if let Some(task) = forwarder {
            let _ = task.await;
        }
        respond(response)
    }

    #[tool(description = "Index one file. The file is read from disk unless content is given.")]
    async fn index_file(
        &self,
        Parameters(req): Parameters<IndexFileRequest>,
    ) -> Result<String, String> {
        respond(self.run_index_file(req).await)
    }

    #[tool(description = "Remove every indexed chunk and forget all content hashes")]
    async fn clear_index(
        &self,
        Parameters(_req): Parameters<ClearIndexRequest>,
    ) -> Result<String, String> {
        respond(self.run_clear_index().await)
    }
}

#[prompt_router]
impl CodeSeekMcpServer {
    #[prompt(name = "index", description = "Index a directory for semantic search")]
    async fn index_prompt(
        &self,
        Parameters(args): Parameters<serde_json::Value>,
    ) -> Result<GetPromptResult, McpError> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");

        Ok(GetPromptResult {
            description: Some(format!("Index {}", path)),
            messages: vec![PromptMessage::new_text(
                PromptMessageRole::User,
                format!("Please index the directory '{}' for semantic search.", path),
            )],
        })
    }

    #[prompt(name = "search", description = "Search the indexed code")]
    async fn search_prompt(
        &self,
        Parameters(args): Parameters<serde_json::Value>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");

        Ok(vec![PromptMessage::new_text(
            PromptMessageRole::User,
            format!("Please search the code for: {}", query),
        )])
    }
}

#[tool_handler(router = self.tool_router)]
#[prompt_handler]
impl ServerHandler for CodeSeekMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: "codeseek".into(),
                title: Some("codeseek - local semantic code search".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Semantic code search over a sharded local index. \
                Use index_directory to build or refresh the index, semantic_search to query it \
                and index_status to check progress."
                    .into(),
            ),
        }
    }
}

impl CodeSeekMcpServer {
    /// Serve the tools over stdio until the client disconnects
    pub async fn serve_stdio(config: Config) -> Result<()> {
        tracing::info!("Starting codeseek MCP server");

        let registry = ServiceRegistry::new();
        let server = Self::new(config, &registry)
            .await
            .context("Failed to create MCP server")?;
        let handle = server.clone();

        let transport = rmcp::transport::io::stdio();
        let result: Result<()> = async {
            server.serve(transport).await?.waiting().await?;
            Ok(())
        }
        .await;

        handle.shutdown().await;
        registry.dispose_all().await;
        result
    }
}

#[cfg(test)]
mod tests;
