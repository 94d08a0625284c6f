//! Document ingestion: chunk → embed → insert.
//!
//! Documents are written one at a time. If any document fails, the passages
//! already inserted by the same call are deleted again before the error is
//! returned, so a failed call leaves the index as it found it (best effort:
//! a failing rollback is logged, not retried).

use std::sync::Arc;

use {
    lore_common::{Error, Result, types::Metadata},
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    chunker::Chunker,
    embeddings::EmbeddingProvider,
    index::{IndexError, IndexedPassage, VectorIndex},
};

/// Outcome of one [`DocumentIngestionPipeline::add_documents`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    /// Documents that produced no chunk (empty or whitespace only).
    pub skipped: usize,
    pub chunks: usize,
    /// Ids of the new passages, in document then chunk order.
    pub ids: Vec<String>,
}

pub struct DocumentIngestionPipeline {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

fn index_error(err: IndexError) -> Error {
    if err.is_validation() {
        Error::validation(err.to_string())
    } else {
        Error::retrieval(err)
    }
}

impl DocumentIngestionPipeline {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Index `texts`, each with the metadata at the same position.
    ///
    /// `metadatas` may be empty (no metadata for any document); otherwise it
    /// must have one entry per text.
    pub async fn add_documents(
        &self,
        texts: &[String],
        metadatas: &[Metadata],
    ) -> Result<IngestReport> {
        if !metadatas.is_empty() && metadatas.len() != texts.len() {
            return Err(Error::validation(format!(
                "{} documents but {} metadata entries",
                texts.len(),
                metadatas.len()
            )));
        }

        let mut report = IngestReport::default();
        for (i, text) in texts.iter().enumerate() {
            let metadata = metadatas.get(i).cloned().unwrap_or_default();
            match self.add_document(text, &metadata).await {
                Ok(ids) if ids.is_empty() => report.skipped += 1,
                Ok(ids) => {
                    report.chunks += ids.len();
                    report.ids.extend(ids);
                },
                Err(e) => {
                    self.rollback(&report.ids).await;
                    return Err(e);
                },
            }
            report.documents += 1;
        }

        info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped,
            "ingested documents"
        );
        Ok(report)
    }

    async fn add_document(&self, text: &str, metadata: &Metadata) -> Result<Vec<String>> {
        let chunks = self.chunker.split_with_metadata(text, metadata);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let metadatas: Vec<Metadata> = chunks
            .into_iter()
            .map(|c| {
                let mut meta = c.metadata;
                meta.insert("chunk_index".into(), Value::from(c.index));
                meta
            })
            .collect();

        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(Error::retrieval)?;
        if vectors.len() != texts.len() {
            return Err(Error::retrieval(anyhow::anyhow!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }

        let ids = self
            .index
            .insert(&texts, &vectors, &metadatas)
            .await
            .map_err(index_error)?;
        debug!(chunks = ids.len(), "document indexed");
        Ok(ids)
    }

    async fn rollback(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        match self.index.delete(ids).await {
            Ok(removed) => warn!(removed, "ingestion failed, rolled back earlier documents"),
            Err(e) => warn!(
                error = %e,
                orphaned = ids.len(),
                "ingestion failed and rollback failed; passages left in the index"
            ),
        }
    }

    /// Remove passages by id; returns how many existed.
    pub async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.index.delete(ids).await.map_err(index_error)
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<IndexedPassage>> {
        self.index.list(limit).await.map_err(index_error)
    }

    pub async fn count(&self) -> Result<usize> {
        self.index.count().await.map_err(index_error)
    }
}
