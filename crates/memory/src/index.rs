//! Vector index capability and an in-process brute-force implementation.

use {
    async_trait::async_trait,
    lore_common::types::Metadata,
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::debug,
};

use crate::vector::{cosine_similarity, normalized_similarity};

/// A stored passage, as returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPassage {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// One nearest-neighbour result. `similarity` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub similarity: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(
        "texts, vectors and metadatas must have the same length (got {texts}, {vectors}, {metadatas})"
    )]
    LengthMismatch {
        texts: usize,
        vectors: usize,
        metadatas: usize,
    },

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl IndexError {
    /// Errors caused by the caller's input rather than the backend.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::LengthMismatch { .. } | Self::DimensionMismatch { .. }
        )
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension every stored and queried vector must have.
    fn dimensions(&self) -> usize;

    /// Store passages; returns their new ids in input order.
    async fn insert(
        &self,
        texts: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<Vec<String>, IndexError>;

    /// Up to `top_k` passages by decreasing similarity to `vector`.
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexError>;

    /// Remove passages by id. Missing ids are ignored; returns how many were
    /// actually removed.
    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError>;

    /// Stored passages in insertion order.
    async fn list(&self, limit: usize) -> Result<Vec<IndexedPassage>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}

/// Shared argument checks for [`VectorIndex::insert`] implementations.
pub fn check_insert(
    texts: &[String],
    vectors: &[Vec<f32>],
    metadatas: &[Metadata],
    dimensions: usize,
) -> Result<(), IndexError> {
    if texts.len() != vectors.len() || texts.len() != metadatas.len() {
        return Err(IndexError::LengthMismatch {
            texts: texts.len(),
            vectors: vectors.len(),
            metadatas: metadatas.len(),
        });
    }
    check_dimensions(vectors.iter().map(Vec::as_slice), dimensions)
}

pub fn check_dimensions<'a>(
    vectors: impl IntoIterator<Item = &'a [f32]>,
    dimensions: usize,
) -> Result<(), IndexError> {
    for v in vectors {
        if v.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                actual: v.len(),
            });
        }
    }
    Ok(())
}

/// Order by decreasing similarity and keep `top_k`. The sort is stable, so
/// ties keep the order the candidates were given in.
pub fn top_hits(mut hits: Vec<IndexHit>, top_k: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    hits.truncate(top_k);
    hits
}

struct Entry {
    id: String,
    text: String,
    vector: Vec<f32>,
    metadata: Metadata,
}

/// Exact nearest-neighbour search over a `Vec`. Suitable for tests and small
/// personal corpora.
pub struct InMemoryVectorIndex {
    dims: usize,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn insert(
        &self,
        texts: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<Vec<String>, IndexError> {
        check_insert(texts, vectors, metadatas, self.dims)?;

        let mut entries = self.entries.write().await;
        let mut ids = Vec::with_capacity(texts.len());
        for ((text, vector), metadata) in texts.iter().zip(vectors).zip(metadatas) {
            let id = uuid::Uuid::new_v4().to_string();
            entries.push(Entry {
                id: id.clone(),
                text: text.clone(),
                vector: vector.clone(),
                metadata: metadata.clone(),
            });
            ids.push(id);
        }
        debug!(inserted = ids.len(), total = entries.len(), "in-memory index insert");
        Ok(ids)
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexError> {
        check_dimensions([vector], self.dims)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let hits = entries
            .iter()
            .map(|e| IndexHit {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                similarity: normalized_similarity(cosine_similarity(vector, &e.vector)),
            })
            .collect();
        Ok(top_hits(hits, top_k))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        Ok(before - entries.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<IndexedPassage>, IndexError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .take(limit)
            .map(|e| IndexedPassage {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().await.len())
    }
}
