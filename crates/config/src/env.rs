//! `LORE_<SECTION>_<KEY>` environment overrides.
//!
//! The config is round-tripped through a JSON value so any field of any
//! section can be overridden without a hand-written mapping per key.

use {serde_json::Value, tracing::debug};

use crate::{ConfigError, schema::LoreConfig};

pub const ENV_PREFIX: &str = "LORE_";

/// Apply overrides from `vars` (typically `std::env::vars()`).
///
/// Variables naming an unknown section or key are ignored. Values are kept as
/// strings when the current field is a string (or unset), otherwise parsed as
/// JSON scalars so `LORE_RAG_TOP_K=8` becomes a number.
pub fn apply_env_overrides<I>(config: LoreConfig, vars: I) -> Result<LoreConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut value = serde_json::to_value(&config)?;
    let Some(root) = value.as_object_mut() else {
        return Ok(config);
    };

    let mut applied = Vec::new();
    for (name, raw) in vars {
        let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let rest = rest.to_ascii_lowercase();
        let Some((section, key)) = rest.split_once('_') else {
            continue;
        };
        let Some(fields) = root.get_mut(section).and_then(Value::as_object_mut) else {
            debug!(var = %name, "ignoring override for unknown section");
            continue;
        };
        let Some(current) = fields.get(key) else {
            debug!(var = %name, "ignoring override for unknown key");
            continue;
        };
        let parsed = override_value(current, &raw);
        fields.insert(key.to_string(), parsed);
        applied.push(name);
    }

    if applied.is_empty() {
        return Ok(config);
    }
    debug!(vars = ?applied, "applied environment overrides");
    serde_json::from_value(value).map_err(|source| ConfigError::EnvOverride {
        vars: applied.join(", "),
        source,
    })
}

fn override_value(current: &Value, raw: &str) -> Value {
    match current {
        Value::String(_) | Value::Null => Value::String(raw.to_string()),
        _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use {super::*, crate::schema::StorageBackend, std::path::PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn numeric_and_string_overrides() {
        let cfg = apply_env_overrides(
            LoreConfig::default(),
            vars(&[
                ("LORE_RAG_TOP_K", "8"),
                ("LORE_RAG_SIMILARITY_THRESHOLD", "0.25"),
                ("LORE_LLM_MODEL", "qwen-max"),
                ("LORE_CHAT_USE_RAG", "false"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.rag.top_k, 8);
        assert!((cfg.rag.similarity_threshold - 0.25).abs() < f32::EPSILON);
        assert_eq!(cfg.llm.model, "qwen-max");
        assert!(!cfg.chat.use_rag);
    }

    #[test]
    fn optional_and_enum_fields() {
        let cfg = apply_env_overrides(
            LoreConfig::default(),
            vars(&[
                ("LORE_STORAGE_DB_PATH", "/var/lib/lore/kb.db"),
                ("LORE_STORAGE_BACKEND", "memory"),
                ("LORE_LLM_BASE_URL", "http://localhost:8000/v1"),
            ]),
        )
        .unwrap();
        assert_eq!(
            cfg.storage.db_path,
            Some(PathBuf::from("/var/lib/lore/kb.db"))
        );
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(
            cfg.llm.base_url.as_deref(),
            Some("http://localhost:8000/v1")
        );
    }

    #[test]
    fn numeric_looking_string_stays_a_string() {
        let cfg =
            apply_env_overrides(LoreConfig::default(), vars(&[("LORE_LLM_MODEL", "1.5")]))
                .unwrap();
        assert_eq!(cfg.llm.model, "1.5");
    }

    #[test]
    fn unrelated_and_unknown_vars_are_ignored() {
        let cfg = apply_env_overrides(
            LoreConfig::default(),
            vars(&[
                ("PATH", "/usr/bin"),
                ("LORE_NOPE_X", "1"),
                ("LORE_RAG_NOT_A_FIELD", "1"),
                ("LORE_", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg, LoreConfig::default());
    }

    #[test]
    fn bad_value_reports_the_variable() {
        let err = apply_env_overrides(
            LoreConfig::default(),
            vars(&[("LORE_RAG_CHUNK_SIZE", "huge")]),
        )
        .unwrap_err();
        match err {
            ConfigError::EnvOverride { vars, .. } => assert_eq!(vars, "LORE_RAG_CHUNK_SIZE"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
