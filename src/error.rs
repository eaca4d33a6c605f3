/// Centralized error types for codeseek using thiserror
///
/// The variants follow the engine's failure classes: backend errors are recoverable during
/// automatic backend selection, file and shard errors are reported beside partial results,
/// and configuration or lifecycle errors are fatal.
use thiserror::Error;

/// Main error type for the search engine
#[derive(Error, Debug)]
pub enum SeekError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Shard store error: {0}")]
    Store(#[from] StoreError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Service is not initialized (state: {0})")]
    NotInitialized(String),

    #[error("Service has been disposed")]
    Disposed,

    #[error("All {0} shard(s) failed")]
    AllShardsFailed(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to embedding backends
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Backend '{backend}' is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Failed to initialize embedding backend '{backend}': {reason}")]
    InitializationFailed { backend: String, reason: String },

    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),

    #[error("Embedding backend is not initialized")]
    NotInitialized,

    #[error("Embedding generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Backend returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Backend initialization was cancelled")]
    Cancelled,
}

/// Errors related to shard store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open shard {shard_id}: {reason}")]
    OpenFailed { shard_id: usize, reason: String },

    #[error("Shard {0} is not initialized")]
    NotInitialized(usize),

    #[error("Failed to write to shard {shard_id}: {reason}")]
    WriteFailed { shard_id: usize, reason: String },

    #[error("Failed to search shard {shard_id}: {reason}")]
    SearchFailed { shard_id: usize, reason: String },

    #[error("Failed to delete from shard {shard_id}: {reason}")]
    DeleteFailed { shard_id: usize, reason: String },

    #[error("Store directory '{0}' is locked by another instance")]
    Locked(String),
}

/// Errors related to file indexing
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Failed to read file '{file}': {reason}")]
    FileReadFailed { file: String, reason: String },

    #[error("File is binary and cannot be indexed: {0}")]
    BinaryFile(String),

    #[error("File size exceeds maximum: {size} > {max}")]
    FileTooLarge { size: usize, max: usize },
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Unknown embedding backend '{0}' (expected auto, local, remote, hosted or cpu)")]
    UnknownBackend(String),

    #[error("Requested embedding backend '{backend}' is unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error(
        "Store at '{path}' was built with {existing}, but the current configuration uses {requested}; clear the index to rebuild it"
    )]
    StoreMismatch {
        path: String,
        existing: String,
        requested: String,
    },
}

/// Errors related to input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{field} must be {constraint}, got {actual}")]
    ConstraintViolation {
        field: String,
        constraint: String,
        actual: String,
    },

    #[error("Empty {0}")]
    Empty(String),
}

/// Errors related to the persistent file hash table
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to load hash table from '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Failed to save hash table to '{path}': {reason}")]
    SaveFailed { path: String, reason: String },
}

// Conversion from anyhow::Error to SeekError
impl From<anyhow::Error> for SeekError {
    fn from(err: anyhow::Error) -> Self {
        // Keep typed errors that travelled through anyhow plumbing
        let err = match err.downcast::<SeekError>() {
            Ok(seek) => return seek,
            Err(err) => err,
        };
        let err = match err.downcast::<ConfigError>() {
            Ok(config) => return SeekError::Config(config),
            Err(err) => err,
        };
        let err = match err.downcast::<EmbeddingError>() {
            Ok(embedding) => return SeekError::Embedding(embedding),
            Err(err) => err,
        };
        let err = match err.downcast::<ValidationError>() {
            Ok(validation) => return SeekError::Validation(validation),
            Err(err) => err,
        };
        let err = match err.downcast::<IndexingError>() {
            Ok(indexing) => return SeekError::Indexing(indexing),
            Err(err) => err,
        };
        let err = match err.downcast::<CacheError>() {
            Ok(cache) => return SeekError::Cache(cache),
            Err(err) => err,
        };
        match err.downcast::<StoreError>() {
            Ok(store) => SeekError::Store(store),
            Err(err) => SeekError::Other(format!("{:#}", err)),
        }
    }
}

impl SeekError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        SeekError::Other(msg.into())
    }

    /// Convert to a user-facing error string suitable for MCP responses
    pub fn to_user_string(&self) -> String {
        format!("{}", self)
    }

    /// Configuration and programmer errors: surfaced immediately, never retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SeekError::Config(_)
                | SeekError::Validation(_)
                | SeekError::NotInitialized(_)
                | SeekError::Disposed
                | SeekError::Embedding(EmbeddingError::DimensionMismatch { .. })
                | SeekError::Store(StoreError::Locked(_))
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SeekError::Embedding(EmbeddingError::Timeout(_))
                | SeekError::Embedding(EmbeddingError::Unavailable { .. })
                | SeekError::Store(StoreError::WriteFailed { .. })
                | SeekError::Store(StoreError::SearchFailed { .. })
                | SeekError::Io(_)
        )
    }
}

/// Result alias for engine operations that surface typed errors
pub type SeekResult<T> = std::result::Result<T, SeekError>;
