/// Knowledge base: owns the capabilities and wires chunking, retrieval,
/// memory ranking and history behind one handle.
use std::{path::Path, sync::Arc};

use {
    lore_common::{Error, Result, types::Metadata},
    lore_config::{LoreConfig, StorageBackend},
    serde::Serialize,
    serde_json::Value,
    sha2::{Digest, Sha256},
    tracing::{debug, info, warn},
    walkdir::WalkDir,
};

use crate::{
    chunker::Chunker,
    embeddings::EmbeddingProvider,
    index::{InMemoryVectorIndex, IndexedPassage, VectorIndex},
    ingest::{DocumentIngestionPipeline, IngestReport},
    ranker::{MemoryRanker, NewMemory, ScoredMemory},
    retrieval::{RetrievalRanker, RetrievalResult},
    schema,
    store::{
        ConversationStore, InMemoryConversationStore, InMemoryMemoryStore, MemoryRecord,
        MemoryStore,
    },
    store_sqlite::{SqliteConversationStore, SqliteMemoryStore, SqliteVectorIndex},
};

/// File extensions picked up by [`KnowledgeBase::ingest_paths`].
pub const INGEST_EXTENSIONS: [&str; 4] = ["md", "markdown", "txt", "text"];

pub struct KnowledgeBase {
    embedder: Arc<dyn EmbeddingProvider>,
    ingestion: DocumentIngestionPipeline,
    retrieval: RetrievalRanker,
    memories: MemoryRanker,
    conversations: Arc<dyn ConversationStore>,
}

/// Status info about the knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStatus {
    pub total_passages: usize,
    pub embedding_model: String,
    pub dimensions: usize,
    pub provider_key: String,
}

/// Files found but not ingested by [`KnowledgeBase::ingest_paths`].
#[derive(Debug, Default, Serialize)]
pub struct PathIngestReport {
    pub files: usize,
    pub unreadable: Vec<String>,
    pub ingest: IngestReport,
}

impl KnowledgeBase {
    pub fn new(
        config: &LoreConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        memory_store: Arc<dyn MemoryStore>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            ingestion: DocumentIngestionPipeline::new(
                Chunker::from_config(&config.rag),
                Arc::clone(&embedder),
                Arc::clone(&index),
            ),
            retrieval: RetrievalRanker::new(Arc::clone(&embedder), index, &config.rag),
            memories: MemoryRanker::new(Arc::clone(&embedder), memory_store, &config.memory),
            conversations,
            embedder,
        }
    }

    /// In-process stores only; nothing survives the process.
    pub fn in_memory(config: &LoreConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let index = Arc::new(InMemoryVectorIndex::new(embedder.dimensions()));
        Self::new(
            config,
            embedder,
            index,
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(InMemoryConversationStore::new()),
        )
    }

    /// Build the stores selected by `config.storage`.
    pub async fn open(
        config: &LoreConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Self::in_memory(config, embedder)),
            StorageBackend::Sqlite => {
                let path = config.storage.resolve_db_path();
                info!(path = %path.display(), "opening knowledge base");
                let pool = schema::open_database(&path).await?;
                let index = Arc::new(SqliteVectorIndex::new(pool.clone(), embedder.dimensions()));
                Ok(Self::new(
                    config,
                    embedder,
                    index,
                    Arc::new(SqliteMemoryStore::new(pool.clone())),
                    Arc::new(SqliteConversationStore::new(pool)),
                ))
            },
        }
    }

    pub fn retrieval(&self) -> &RetrievalRanker {
        &self.retrieval
    }

    pub fn memories(&self) -> &MemoryRanker {
        &self.memories
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    pub async fn add_documents(
        &self,
        texts: &[String],
        metadatas: &[Metadata],
    ) -> Result<IngestReport> {
        self.ingestion.add_documents(texts, metadatas).await
    }

    /// Walk files and directories, ingesting every text or markdown file.
    ///
    /// Each document is tagged with its `source` path, `filename` and the
    /// `sha256` of its content. Unreadable files are reported, not fatal.
    pub async fn ingest_paths(&self, paths: &[impl AsRef<Path>]) -> Result<PathIngestReport> {
        let mut report = PathIngestReport::default();
        let mut texts = Vec::new();
        let mut metadatas = Vec::new();

        for root in paths {
            let root = root.as_ref();
            if !root.exists() {
                return Err(Error::validation(format!("{} does not exist", root.display())));
            }
            let entries = WalkDir::new(root)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .flatten();
            for entry in entries {
                let path = entry.path();
                if !path.is_file() || !has_ingest_extension(path) {
                    continue;
                }
                let path_str = path.to_string_lossy().to_string();
                match tokio::fs::read_to_string(path).await {
                    Ok(content) => {
                        metadatas.push(file_metadata(path, &content));
                        texts.push(content);
                        report.files += 1;
                    },
                    Err(e) => {
                        warn!(path = %path_str, error = %e, "failed to read file");
                        report.unreadable.push(path_str);
                    },
                }
            }
        }

        debug!(files = report.files, "collected files for ingestion");
        report.ingest = self.ingestion.add_documents(&texts, &metadatas).await?;
        Ok(report)
    }

    pub async fn delete_documents(&self, ids: &[String]) -> Result<usize> {
        self.ingestion.delete(ids).await
    }

    pub async fn list_documents(&self, limit: usize) -> Result<Vec<IndexedPassage>> {
        self.ingestion.list(limit).await
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        self.retrieval
            .search(
                query,
                top_k.unwrap_or(self.retrieval.default_top_k()),
                threshold.unwrap_or(self.retrieval.default_threshold()),
            )
            .await
    }

    pub async fn remember(&self, user_id: &str, memory: NewMemory) -> Result<MemoryRecord> {
        self.memories.remember(user_id, memory).await
    }

    pub async fn rank_memories(
        &self,
        user_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredMemory>> {
        self.memories
            .rank(
                user_id,
                query,
                top_k.unwrap_or(self.memories.default_top_k()),
            )
            .await
    }

    pub async fn list_memories(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.memories.list(user_id, limit).await
    }

    pub async fn forget(&self, user_id: &str, id: &str) -> Result<bool> {
        self.memories.forget(user_id, id).await
    }

    /// Get status information about the knowledge base.
    pub async fn status(&self) -> Result<KnowledgeStatus> {
        Ok(KnowledgeStatus {
            total_passages: self.ingestion.count().await?,
            embedding_model: self.embedder.model_name().to_string(),
            dimensions: self.embedder.dimensions(),
            provider_key: self.embedder.provider_key().to_string(),
        })
    }
}

fn has_ingest_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| INGEST_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn file_metadata(path: &Path, content: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(
        "source".into(),
        Value::String(path.to_string_lossy().to_string()),
    );
    if let Some(name) = path.file_name() {
        meta.insert(
            "filename".into(),
            Value::String(name.to_string_lossy().to_string()),
        );
    }
    meta.insert("sha256".into(), Value::String(sha256_hex(content)));
    meta
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}
