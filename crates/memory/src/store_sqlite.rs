//! SQLite implementations of the vector index and the memory and
//! conversation stores. Vectors are scanned in full; no ANN structure.

use {
    anyhow::Context,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    lore_common::types::Metadata,
    sqlx::SqlitePool,
    tracing::{debug, warn},
};

use crate::{
    index::{
        IndexError, IndexHit, IndexedPassage, VectorIndex, check_dimensions, check_insert,
        top_hits,
    },
    store::{ConversationStore, ConversationTurn, MemoryRecord, MemoryStore, exchanges_to_turns},
    vector::{cosine_similarity, decode_vector, encode_vector, normalized_similarity},
};

fn metadata_to_json(metadata: &Metadata) -> anyhow::Result<String> {
    Ok(serde_json::to_string(metadata)?)
}

fn metadata_from_json(raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_default()
}

fn timestamp_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
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

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        let mut ids = Vec::with_capacity(texts.len());
        for ((text, vector), metadata) in texts.iter().zip(vectors).zip(metadatas) {
            let id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO passages (id, text, metadata, embedding, dims, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(text)
            .bind(metadata_to_json(metadata)?)
            .bind(encode_vector(vector))
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert passage")?;
            ids.push(id);
        }
        tx.commit().await.map_err(anyhow::Error::from)?;

        debug!(inserted = ids.len(), "sqlite index insert");
        Ok(ids)
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexError> {
        check_dimensions([vector], self.dims)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, String, String, Vec<u8>)> = sqlx::query_as(
            "SELECT id, text, metadata, embedding FROM passages ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("scan passages")?;

        let mut hits = Vec::with_capacity(rows.len());
        for (id, text, metadata, blob) in rows {
            let Some(stored) = decode_vector(&blob).filter(|v| v.len() == self.dims) else {
                warn!(%id, "skipping passage with unreadable or mismatched embedding");
                continue;
            };
            hits.push(IndexHit {
                id,
                text,
                metadata: metadata_from_json(&metadata),
                similarity: normalized_similarity(cosine_similarity(vector, &stored)),
            });
        }
        Ok(top_hits(hits, top_k))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        let mut removed = 0usize;
        for id in ids {
            let result = sqlx::query("DELETE FROM passages WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .context("delete passage")?;
            removed += result.rows_affected() as usize;
        }
        Ok(removed)
    }

    async fn list(&self, limit: usize) -> Result<Vec<IndexedPassage>, IndexError> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT id, text, metadata FROM passages ORDER BY rowid LIMIT ?")
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .context("list passages")?;
        Ok(rows
            .into_iter()
            .map(|(id, text, metadata)| IndexedPassage {
                id,
                text,
                metadata: metadata_from_json(&metadata),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM passages")
            .fetch_one(&self.pool)
            .await
            .context("count passages")?;
        Ok(n as usize)
    }
}

pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type MemoryRow = (String, String, String, String, f64, Vec<u8>, String, i64);

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn save(&self, record: &MemoryRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO memories
                (id, user_id, content, memory_type, importance, embedding, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.content)
        .bind(record.memory_type.as_str())
        .bind(f64::from(record.importance))
        .bind(encode_vector(&record.vector))
        .bind(metadata_to_json(&record.metadata)?)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("insert memory")?;
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str) -> anyhow::Result<Vec<MemoryRecord>> {
        let rows: Vec<MemoryRow> = sqlx::query_as(
            "SELECT id, user_id, content, memory_type, importance, embedding, metadata, created_at
             FROM memories WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("load memories")?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, user_id, content, memory_type, importance, blob, metadata, created_at) in rows {
            let Some(vector) = decode_vector(&blob) else {
                warn!(%id, "skipping memory with unreadable embedding");
                continue;
            };
            records.push(MemoryRecord {
                id,
                user_id,
                content,
                memory_type: memory_type.into(),
                importance: importance as f32,
                vector,
                created_at: timestamp_from_millis(created_at),
                metadata: metadata_from_json(&metadata),
            });
        }
        Ok(records)
    }

    async fn delete(&self, user_id: &str, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("delete memory")?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append_exchange(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO conversations (user_id, user_message, assistant_message, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(user_message)
        .bind(assistant_message)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("append exchange")?;
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        exchanges: usize,
    ) -> anyhow::Result<Vec<ConversationTurn>> {
        if exchanges == 0 {
            return Ok(Vec::new());
        }
        let mut rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT user_message, assistant_message, created_at FROM conversations
             WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::try_from(exchanges).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("load history")?;
        rows.reverse();

        Ok(exchanges_to_turns(rows.into_iter().map(
            |(user, assistant, at)| (user, assistant, timestamp_from_millis(at)),
        )))
    }

    async fn clear(&self, user_id: &str) -> anyhow::Result<usize> {
        let result = sqlx::query("DELETE FROM conversations WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("clear history")?;
        Ok(result.rows_affected() as usize)
    }
}
