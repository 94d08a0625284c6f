//! Query → relevant passages: embed, nearest-neighbour search, threshold.

use std::sync::Arc;

use {
    lore_common::{Error, Result, types::Metadata},
    lore_config::RagConfig,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    embeddings::EmbeddingProvider,
    index::{IndexHit, VectorIndex},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// In `[0, 1]`; results are ordered by this, descending.
    pub similarity: f32,
}

impl From<IndexHit> for RetrievalResult {
    fn from(hit: IndexHit) -> Self {
        Self {
            id: hit.id,
            text: hit.text,
            metadata: hit.metadata,
            similarity: hit.similarity,
        }
    }
}

pub struct RetrievalRanker {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    threshold: f32,
}

impl RetrievalRanker {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: &RagConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            top_k: config.top_k,
            threshold: config.similarity_threshold,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    pub fn default_threshold(&self) -> f32 {
        self.threshold
    }

    /// At most `top_k` passages with `similarity >= threshold`, in index
    /// order. Fewer (or none) is a normal outcome, not an error.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await.map_err(Error::retrieval)?;
        let hits = self
            .index
            .search(&vector, top_k)
            .await
            .map_err(Error::retrieval)?;

        let candidates = hits.len();
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|hit| hit.similarity >= threshold)
            .map(RetrievalResult::from)
            .collect();

        debug!(
            top_k,
            threshold,
            candidates,
            kept = results.len(),
            "retrieval search"
        );
        Ok(results)
    }

    /// [`Self::search`] with the configured `top_k` and threshold.
    pub async fn search_default(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        self.search(query, self.top_k, self.threshold).await
    }
}
