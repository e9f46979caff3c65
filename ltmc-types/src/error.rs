//! Error kinds shared across every LTMC component.

use thiserror::Error;

/// Result type alias used throughout the LTMC crates.
pub type Result<T> = std::result::Result<T, LtmcError>;

/// Which backend a [`LtmcError::Storage`] failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// The relational primary store (schema, transactions, sequences).
    Relational,
    /// The persisted vector index.
    Vector,
    /// The graph store.
    Graph,
    /// The cache layer.
    Cache,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Relational => "relational",
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::Cache => "cache",
        };
        f.write_str(s)
    }
}

/// Errors that can cross a coordinator, storage, or dispatch boundary.
///
/// Every variant maps to a stable `kind` string in the MCP error envelope
/// (see `ltmc_protocol::types`); never leak source paths or stack traces
/// through the `message` rendered by `Display`.
#[derive(Debug, Error)]
pub enum LtmcError {
    /// Bad or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Schema missing columns, or migration failed. Fatal at startup.
    #[error("schema error: {0}")]
    Schema(String),

    /// Bad tool input. Does not affect state.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness constraint violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Backend failure. Relational and vector are fatal to the operation;
    /// graph and cache degrade instead of failing the caller.
    #[error("storage error ({kind}): {message}")]
    Storage {
        kind: StorageKind,
        message: String,
    },

    /// A deadline was exceeded before the operation reached a safe boundary.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// An optional backend (graph, cache) is down.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Unexpected internal failure; always logged with context, surfaced opaquely.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LtmcError {
    /// Stable, client-facing error kind used in the MCP error envelope.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Schema(_) => "SchemaError",
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::Storage { .. } => "StorageError",
            Self::Timeout(_) => "Timeout",
            Self::Unavailable(_) => "Unavailable",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether a client may reasonably retry this error.
    #[must_use]
    pub const fn retry_possible(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }

    #[must_use]
    pub fn storage(kind: StorageKind, message: impl Into<String>) -> Self {
        Self::Storage {
            kind,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for LtmcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {e}"))
    }
}
