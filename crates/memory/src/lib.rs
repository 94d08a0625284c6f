//! Knowledge base core: documents → chunked → embedded → ranked retrieval,
//! plus per-user memory ranking and conversation history.

pub mod chunker;
pub mod embeddings;
pub mod embeddings_openai;
pub mod index;
pub mod ingest;
pub mod manager;
pub mod ranker;
pub mod retrieval;
pub mod schema;
pub mod store;
pub mod store_sqlite;
pub mod vector;

#[cfg(test)]
mod testing;

pub use {
    chunker::{Chunk, Chunker},
    embeddings::EmbeddingProvider,
    index::{IndexError, IndexHit, IndexedPassage, InMemoryVectorIndex, VectorIndex},
    ingest::{DocumentIngestionPipeline, IngestReport},
    manager::{KnowledgeBase, KnowledgeStatus, PathIngestReport},
    ranker::{MemoryRanker, NewMemory, ScoredMemory},
    retrieval::{RetrievalRanker, RetrievalResult},
    store::{
        ConversationStore, ConversationTurn, InMemoryConversationStore, InMemoryMemoryStore,
        MemoryRecord, MemoryStore, MemoryType,
    },
};
