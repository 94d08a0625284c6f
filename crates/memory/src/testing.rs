//! Deterministic embedders shared by the unit tests.

use {anyhow::bail, async_trait::async_trait};

use crate::embeddings::EmbeddingProvider;

/// Bag-of-words embedder: one dimension per vocabulary word, `1.0` when the
/// text contains that word as a whole token.
pub struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
}

pub const TOPICS: [&str; 8] = [
    "rust", "python", "database", "memory", "search", "network", "cooking", "music",
];

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
        }
    }

    pub fn topics() -> Self {
        Self::new(&TOPICS)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        self.vocabulary
            .iter()
            .map(|word| if tokens.contains(word) { 1.0 } else { 0.0 })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    fn model_name(&self) -> &str {
        "keyword-mock"
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Embedder whose every call fails, standing in for an unreachable service.
pub struct FailingEmbedder {
    pub dims: usize,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        bail!("embedding service unreachable")
    }

    fn model_name(&self) -> &str {
        "failing-mock"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
