//! Configuration schema. Every section is optional in the file; missing
//! fields fall back to [`Default`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoreConfig {
    pub rag: RagConfig,
    pub memory: MemoryConfig,
    pub chat: ChatConfig,
    pub context: ContextConfig,
    pub embeddings: EmbeddingsConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
}

/// Chunking and passage retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters carried from the end of one chunk into the next.
    pub chunk_overlap: usize,
    /// Candidates requested from the vector index per query.
    pub top_k: usize,
    /// Passages scoring strictly below this similarity are dropped.
    pub similarity_threshold: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 5,
            similarity_threshold: 0.7,
        }
    }
}

/// Personal memory ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memories ranked per chat request (`memory_top_k`).
    pub top_k: usize,
    /// Memories returned when listing everything for a user.
    pub list_limit: usize,
    /// Importance used when the caller does not give one.
    pub default_importance: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            list_limit: 50,
            default_importance: 0.5,
        }
    }
}

/// What the chat boundary does when retrieval or memory ranking fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure and continue with an empty section.
    #[default]
    Degrade,
    /// Fail the whole request.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Most recent exchanges (user + assistant message pairs) kept in context.
    pub history_window: usize,
    pub use_rag: bool,
    pub use_memory: bool,
    pub failure_policy: FailurePolicy,
    /// Replaces the built-in base instructions when set.
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            use_rag: true,
            use_memory: true,
            failure_policy: FailurePolicy::Degrade,
            system_prompt: None,
        }
    }
}

/// Per-section character budgets for the assembled generation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_passage_chars: usize,
    pub max_memory_chars: usize,
    pub max_history_chars: usize,
    pub max_query_chars: usize,
    /// A passage is cut rather than dropped only if at least this many
    /// characters of budget remain.
    pub min_passage_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_passage_chars: 6000,
            max_memory_chars: 1500,
            max_history_chars: 8000,
            max_query_chars: 4000,
            min_passage_chars: 200,
        }
    }
}

/// OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    /// Environment variable holding the API key. Local servers accept any key.
    pub api_key_env: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 768,
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai`, `local` or `dashscope`; selects the default base URL.
    pub provider: String,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            base_url: None,
            model: "gpt-4-turbo-preview".into(),
            temperature: 0.7,
            max_tokens: 2000,
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Process-local stores, lost on exit.
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database file; defaults to the platform data directory.
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Database path to open, falling back to `<data_dir>/lore.db`.
    pub fn resolve_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        crate::project_dirs()
            .map(|dirs| dirs.data_dir().join("lore.db"))
            .unwrap_or_else(|| PathBuf::from("lore.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LoreConfig::default();
        assert_eq!(cfg.rag.chunk_size, 500);
        assert_eq!(cfg.rag.chunk_overlap, 50);
        assert_eq!(cfg.rag.top_k, 5);
        assert!((cfg.rag.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.chat.history_window, 10);
        assert_eq!(cfg.memory.top_k, 5);
        assert_eq!(cfg.chat.failure_policy, FailurePolicy::Degrade);
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn explicit_db_path_wins() {
        let storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            db_path: Some(PathBuf::from("/tmp/kb.db")),
        };
        assert_eq!(storage.resolve_db_path(), PathBuf::from("/tmp/kb.db"));
    }

    #[test]
    fn default_db_path_is_named_lore_db() {
        let path = StorageConfig::default().resolve_db_path();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("lore.db"));
    }
}
