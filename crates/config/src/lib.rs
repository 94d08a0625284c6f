//! Configuration for lore: schema, file loading, environment overrides and
//! validation.

use std::path::PathBuf;

pub mod env;
pub mod loader;
pub mod schema;
mod validate;

pub use {
    loader::{ConfigFormat, discover_config_file, load_config, load_config_file, parse_config},
    schema::{
        ChatConfig, ContextConfig, EmbeddingsConfig, FailurePolicy, LlmConfig, LoreConfig,
        MemoryConfig, RagConfig, StorageBackend, StorageConfig,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format: {0} (expected .toml, .yaml, .yml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value in environment override ({vars}): {source}")]
    EnvOverride {
        vars: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Platform directories for config and data files.
pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "lore", "lore")
}
