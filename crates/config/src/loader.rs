//! Config file discovery and parsing.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{ConfigError, env::apply_env_overrides, schema::LoreConfig};

/// File names probed in the working directory, in order.
const CANDIDATE_NAMES: [&str; 4] = ["lore.toml", "lore.yaml", "lore.yml", "lore.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())? {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse configuration text in the given format.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<LoreConfig, ConfigError> {
    let config = match format {
        ConfigFormat::Toml => toml::from_str(content)?,
        // An empty YAML document deserializes as unit, not as an empty map.
        ConfigFormat::Yaml if content.trim().is_empty() => LoreConfig::default(),
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        ConfigFormat::Json => serde_json::from_str(content)?,
    };
    Ok(config)
}

/// Read and parse a config file, picking the format from its extension.
pub fn load_config_file(path: &Path) -> Result<LoreConfig, ConfigError> {
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, format)
}

/// First existing config file: working directory candidates, then the
/// platform config directory.
pub fn discover_config_file() -> Option<PathBuf> {
    let local = CANDIDATE_NAMES.into_iter().map(PathBuf::from);
    let global = crate::project_dirs()
        .into_iter()
        .flat_map(|dirs| {
            let dir = dirs.config_dir().to_path_buf();
            CANDIDATE_NAMES.map(|name| dir.join(name))
        });
    local.chain(global).find(|p| p.is_file())
}

/// Load the effective configuration.
///
/// An explicit `path` must exist. Without one, the first discovered file is
/// used, or defaults when nothing is found. `LORE_<SECTION>_<KEY>` environment
/// variables are applied on top, then the result is validated; warnings are
/// logged and errors returned.
pub fn load_config(path: Option<&Path>) -> Result<LoreConfig, ConfigError> {
    let file = match path {
        Some(p) => Some(p.to_path_buf()),
        None => discover_config_file(),
    };

    let config = match &file {
        Some(p) => {
            info!(path = %p.display(), "loading config");
            load_config_file(p)?
        },
        None => {
            debug!("no config file found, using defaults");
            LoreConfig::default()
        },
    };

    let config = apply_env_overrides(config, std::env::vars())?;
    for warning in config.validate()? {
        warn!("{warning}");
    }
    Ok(config)
}
