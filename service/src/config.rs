//! Service configuration.
//!
//! Loaded with `confyg`: an optional TOML file, then `TOUR_GRAPH_*`
//! environment variables layered on top (`TOUR_GRAPH_<SECTION>_<KEY>`, e.g.
//! `TOUR_GRAPH_INDEX_MAX_CACHED_ROUTES`). Every field has a default, so an
//! empty file is valid.
//!
//! # Loading Priority
//!
//! 1. Explicit path passed to [`ServiceConfig::load`]
//! 2. `TOUR_GRAPH_CONFIG` environment variable
//! 3. Built-in defaults
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "tours.db"
//!
//! [index]
//! max_cached_routes = 1024
//! max_memory_mb = 256
//! auto_reload = true
//! reload_debounce_ms = 0
//! ```

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use confyg::{env, Confygery};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::store::{EntityStore, MemoryStore, SqliteStore, StoreResult};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "TOUR_GRAPH";

/// Environment variable naming a config file.
pub const CONFIG_PATH_ENV: &str = "TOUR_GRAPH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot load config: {0}")]
    Load(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file. None opens a private in-memory database.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Open the configured entity store.
    pub fn open(&self) -> StoreResult<Arc<dyn EntityStore>> {
        Ok(match (self.backend, &self.path) {
            (StoreBackend::Memory, _) => Arc::new(MemoryStore::new()),
            (StoreBackend::Sqlite, Some(path)) => Arc::new(SqliteStore::open(path)?),
            (StoreBackend::Sqlite, None) => Arc::new(SqliteStore::in_memory()?),
        })
    }
}

/// Adjacency index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Registry capacity. The least recently used route is evicted beyond it.
    #[serde(deserialize_with = "from_value_or_str")]
    pub max_cached_routes: usize,
    /// Per-route subgraph memory cap, checked at load.
    #[serde(deserialize_with = "from_value_or_str")]
    pub max_memory_mb: usize,
    /// Reload stale subgraphs inline when a query touches them.
    #[serde(deserialize_with = "from_value_or_str")]
    pub auto_reload: bool,
    /// Minimum snapshot age before a query reloads it. 0 disables debouncing.
    #[serde(deserialize_with = "from_value_or_str")]
    pub reload_debounce_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_cached_routes: 1024,
            max_memory_mb: 256,
            auto_reload: true,
            reload_debounce_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    pub index: IndexConfig,
}

impl ServiceConfig {
    /// Defaults with the given index settings.
    pub fn with_index(index: IndexConfig) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Parse TOML content without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.normalized().validate()
    }

    /// Load the config file (if any) and apply environment overrides.
    ///
    /// `path` wins over `TOUR_GRAPH_CONFIG`. An explicitly named file must
    /// exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Confygery::new().map_err(|e| ConfigError::Load(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(path) {
            std::fs::metadata(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            builder
                .add_file(&path.to_string_lossy())
                .map_err(|e| ConfigError::Load(format!("config file: {e}")))?;
        }

        let mut env_opts = env::Options::with_top_level(ENV_PREFIX);
        env_opts.add_section("store");
        env_opts.add_section("index");
        builder
            .add_env(env_opts)
            .map_err(|e| ConfigError::Load(format!("config env: {e}")))?;

        let config: Self = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build: {e}")))?;
        config.normalized().validate()
    }

    /// Defaults plus environment overrides, reading `TOUR_GRAPH_CONFIG` if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Explicit path, else `TOUR_GRAPH_CONFIG`.
    pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.index.max_cached_routes == 0 {
            return Err(invalid("index.max_cached_routes", "0"));
        }
        if self.index.max_memory_mb == 0 {
            return Err(invalid("index.max_memory_mb", "0"));
        }
        Ok(self)
    }

    /// An empty `store.path` (e.g. an empty env override) means in-memory.
    fn normalized(mut self) -> Self {
        if self
            .store
            .path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.store.path = None;
        }
        self
    }
}

fn invalid(key: &'static str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.into(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueOrStr<T> {
    Value(T),
    Str(String),
}

/// Environment overrides arrive as strings; accept both `8` and `"8"`.
fn from_value_or_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match ValueOrStr::<T>::deserialize(deserializer)? {
        ValueOrStr::Value(value) => Ok(value),
        ValueOrStr::Str(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
