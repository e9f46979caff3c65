//! ABOUTME: Configuration and bootstrap path resolution for the LTMC memory service
//! ABOUTME: Single source of truth: TOML file, overlaid by `LTMC_*` environment variables
//!
//! Startup sequence (driven by `ltmc-server`):
//! load config → suppress stdout logging → run migrations → load vector index
//! (or create empty) → probe graph → probe cache → run consistency sweep → enter
//! the MCP loop. This crate owns only the first step and the path-resolution
//! rules every later step depends on.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ltmc_types::{LtmcError, Result};

/// Environment variable prefix for all configuration overrides.
const ENV_PREFIX: &str = "LTMC_";

/// Configuration file discovery order, relative to the current directory.
const CONFIG_SEARCH_PATHS: &[&str] = &["ltmc.toml", ".ltmc.toml", "config/ltmc.toml"];

/// Central LTMC configuration.
///
/// All paths are resolved to absolute values by [`LtmcConfig::finalize`]
/// before any store is opened; a bare filename for an index or database is
/// combined with `data_dir`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LtmcConfig {
    /// Root directory for all local persisted state. Required; empty fails fast.
    pub data_dir: String,
    /// Filename or absolute path for the relational store. Relative → under `data_dir`.
    pub relational_db_path: String,
    /// Filename or absolute path for the vector index. Relative → under `data_dir`.
    pub vector_index_path: String,

    /// Graph backend connection (optional; absence → degraded mode).
    pub graph_uri: Option<String>,
    pub graph_user: Option<String>,
    pub graph_password: Option<String>,
    pub graph_database: Option<String>,

    /// Cache backend connection (optional; absence → no cache).
    pub cache_uri: Option<String>,
    pub cache_password: Option<String>,

    /// Embedder selection; dimension must match the vector index at load time.
    pub embedding_model_name: String,
    pub embedding_dim: usize,

    /// Chunking parameters, in tokens.
    pub max_chunk_size: usize,
    pub overlap_size: usize,

    /// Default TTL for cached retrieval results.
    pub cache_ttl_seconds: u64,

    /// Worker pool bound for blocking I/O (embed, disk save, DB calls).
    pub max_concurrent_operations: usize,

    pub log_level: String,
    /// File logs are written to. Never stdout — see `ltmc-protocol`'s stream hygiene rule.
    pub log_file: String,
}

impl Default for LtmcConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            relational_db_path: "primary.db".to_string(),
            vector_index_path: "vector_index".to_string(),
            graph_uri: None,
            graph_user: None,
            graph_password: None,
            graph_database: None,
            cache_uri: None,
            cache_password: None,
            embedding_model_name: "hash-embedder-v1".to_string(),
            embedding_dim: 384,
            max_chunk_size: 1000,
            overlap_size: 200,
            cache_ttl_seconds: 300,
            max_concurrent_operations: 10,
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl LtmcConfig {
    /// Load configuration from the first discoverable TOML file, overlay
    /// `LTMC_*` environment variables, then resolve and validate paths.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Config`] if no `data_dir` is configured, if TOML
    /// parsing fails, or if a required path would resolve to an empty string.
    pub fn load() -> Result<Self> {
        let mut config = Self::discover_file()?.unwrap_or_default();
        config.apply_env_overrides();
        config.finalize()?;
        Ok(config)
    }

    /// Load from an explicit TOML file path, still overlaid by env vars.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Config`] on missing/unreadable file, bad TOML, or
    /// failed path resolution.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        config.finalize()?;
        Ok(config)
    }

    fn discover_file() -> Result<Option<Self>> {
        if let Ok(path) = env::var(format!("{ENV_PREFIX}CONFIG")) {
            return Self::parse_file(Path::new(&path)).map(Some);
        }
        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.is_file() {
                return Self::parse_file(path).map(Some);
            }
        }
        Ok(None)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LtmcError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| LtmcError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Overlay recognized `LTMC_*` environment variables onto this config.
    fn apply_env_overrides(&mut self) {
        macro_rules! overlay_string {
            ($field:ident, $key:literal) => {
                if let Ok(v) = env::var(concat!("LTMC_", $key)) {
                    self.$field = v;
                }
            };
        }
        macro_rules! overlay_opt_string {
            ($field:ident, $key:literal) => {
                if let Ok(v) = env::var(concat!("LTMC_", $key)) {
                    self.$field = Some(v);
                }
            };
        }
        macro_rules! overlay_parsed {
            ($field:ident, $key:literal) => {
                if let Ok(v) = env::var(concat!("LTMC_", $key)) {
                    if let Ok(parsed) = v.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }

        overlay_string!(data_dir, "DATA_DIR");
        overlay_string!(relational_db_path, "RELATIONAL_DB_PATH");
        overlay_string!(vector_index_path, "VECTOR_INDEX_PATH");
        overlay_opt_string!(graph_uri, "GRAPH_URI");
        overlay_opt_string!(graph_user, "GRAPH_USER");
        overlay_opt_string!(graph_password, "GRAPH_PASSWORD");
        overlay_opt_string!(graph_database, "GRAPH_DATABASE");
        overlay_opt_string!(cache_uri, "CACHE_URI");
        overlay_opt_string!(cache_password, "CACHE_PASSWORD");
        overlay_string!(embedding_model_name, "EMBEDDING_MODEL_NAME");
        overlay_parsed!(embedding_dim, "EMBEDDING_DIM");
        overlay_parsed!(max_chunk_size, "MAX_CHUNK_SIZE");
        overlay_parsed!(overlap_size, "OVERLAP_SIZE");
        overlay_parsed!(cache_ttl_seconds, "CACHE_TTL_SECONDS");
        overlay_parsed!(max_concurrent_operations, "MAX_CONCURRENT_OPERATIONS");
        overlay_string!(log_level, "LOG_LEVEL");
        overlay_string!(log_file, "LOG_FILE");
    }

    /// Resolve every path to absolute and validate required fields.
    ///
    /// A bare filename for `relational_db_path` / `vector_index_path` is
    /// combined with `data_dir`; an empty `data_dir` fails fast rather than
    /// letting a relative-to-empty path silently resolve under the process's
    /// working directory.
    fn finalize(&mut self) -> Result<()> {
        if self.data_dir.trim().is_empty() {
            return Err(LtmcError::Config(
                "data_dir is required and must not be empty".to_string(),
            ));
        }
        let data_dir = absolute(Path::new(&self.data_dir))?;
        self.data_dir = data_dir.display().to_string();

        self.relational_db_path = resolve_under(&data_dir, &self.relational_db_path)?;
        self.vector_index_path = resolve_under(&data_dir, &self.vector_index_path)?;

        if self.log_file.trim().is_empty() {
            self.log_file = data_dir.join("logs").join("ltmc.log").display().to_string();
        } else {
            self.log_file = resolve_under(&data_dir, &self.log_file)?;
        }

        if self.embedding_dim == 0 {
            return Err(LtmcError::Config(
                "embedding_dim must be greater than zero".to_string(),
            ));
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(LtmcError::Config(format!(
                "overlap_size ({}) must be smaller than max_chunk_size ({})",
                self.overlap_size, self.max_chunk_size
            )));
        }
        Ok(())
    }

    /// Absolute path to the directory the vector index's temp-file-and-rename
    /// save protocol should use.
    #[must_use]
    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Whether a graph backend has been configured at all.
    #[must_use]
    pub fn has_graph(&self) -> bool {
        self.graph_uri.is_some()
    }

    /// Whether a cache backend has been configured at all.
    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache_uri.is_some()
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(LtmcError::Config("path must not be empty".to_string()));
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| LtmcError::Config(format!("resolving current directory: {e}")))?;
    Ok(cwd.join(path))
}

/// Resolve `value` to an absolute path: absolute paths pass through,
/// everything else is joined under `base`.
fn resolve_under(base: &Path, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(LtmcError::Config(
            "expected a non-empty path component".to_string(),
        ));
    }
    let candidate = Path::new(value);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };
    Ok(resolved.display().to_string())
}
