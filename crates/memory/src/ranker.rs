//! Scores and orders a user's memories against a query.
//!
//! Memories are few per user, so ranking is a full scan over
//! [`MemoryStore::find_by_user`] with a cosine score per record. There is no
//! threshold: every memory of the user is a candidate, and `importance` only
//! breaks ties between equal scores.

use std::{cmp::Ordering, sync::Arc};

use {
    chrono::Utc,
    lore_common::{Error, Result, types::Metadata},
    lore_config::MemoryConfig,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    embeddings::EmbeddingProvider,
    store::{MemoryRecord, MemoryStore, MemoryType},
    vector::cosine_similarity,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: MemoryRecord,
    /// Cosine similarity to the query, in `[-1, 1]`; `0.0` for an empty query.
    pub score: f32,
}

/// Descending score, then descending importance, then newest first.
fn ranking_order(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.memory.importance.total_cmp(&a.memory.importance))
        .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
}

/// Arguments of [`MemoryRanker::remember`].
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    pub memory_type: MemoryType,
    /// Falls back to the configured default importance.
    pub importance: Option<f32>,
    pub metadata: Metadata,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct MemoryRanker {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn MemoryStore>,
    config: MemoryConfig,
}

impl MemoryRanker {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn MemoryStore>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config: config.clone(),
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    /// The `top_k` memories of `user_id` most relevant to `query`.
    ///
    /// A blank query is the degenerate zero vector: every memory scores `0.0`
    /// and the order falls through to importance and recency. The embedder is
    /// not called in that case.
    ///
    /// Memories whose vector dimension differs from the embedder's are skipped
    /// for blank and non-blank queries alike.
    pub async fn rank(
        &self,
        user_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredMemory>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = if query.trim().is_empty() {
            None
        } else {
            Some(self.embedder.embed(query).await.map_err(Error::memory)?)
        };

        let records = self
            .store
            .find_by_user(user_id)
            .await
            .map_err(Error::memory)?;
        let total = records.len();

        let expected = query_vector
            .as_ref()
            .map_or_else(|| self.embedder.dimensions(), Vec::len);
        let mut scored = Vec::with_capacity(total);
        for memory in records {
            if memory.vector.len() != expected {
                warn!(
                    memory_id = %memory.id,
                    expected,
                    actual = memory.vector.len(),
                    "skipping memory with mismatched embedding dimension"
                );
                continue;
            }
            let score = match &query_vector {
                None => 0.0,
                Some(q) => cosine_similarity(q, &memory.vector),
            };
            scored.push(ScoredMemory { memory, score });
        }

        scored.sort_by(ranking_order);
        scored.truncate(top_k);

        debug!(%user_id, total, returned = scored.len(), top_k, "ranked memories");
        Ok(scored)
    }

    /// [`Self::rank`] with the configured `top_k`.
    pub async fn rank_default(&self, user_id: &str, query: &str) -> Result<Vec<ScoredMemory>> {
        self.rank(user_id, query, self.config.top_k).await
    }

    /// Every memory of a user (up to `limit`), most important first.
    pub async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .rank(user_id, "", limit)
            .await?
            .into_iter()
            .map(|s| s.memory)
            .collect())
    }

    /// Embed and store a new memory.
    pub async fn remember(&self, user_id: &str, memory: NewMemory) -> Result<MemoryRecord> {
        let content = memory.content.trim();
        if content.is_empty() {
            return Err(Error::validation("memory content is empty"));
        }
        if user_id.trim().is_empty() {
            return Err(Error::validation("user id is empty"));
        }
        let importance = memory.importance.unwrap_or(self.config.default_importance);
        if !(0.0..=1.0).contains(&importance) {
            return Err(Error::validation(format!(
                "importance must be within [0, 1], got {importance}"
            )));
        }

        let vector = self.embedder.embed(content).await.map_err(Error::memory)?;
        let record = MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            memory_type: memory.memory_type,
            importance,
            vector,
            created_at: Utc::now(),
            metadata: memory.metadata,
        };
        self.store.save(&record).await.map_err(Error::memory)?;

        info!(
            %user_id,
            memory_id = %record.id,
            memory_type = %record.memory_type,
            importance,
            "memory saved"
        );
        Ok(record)
    }

    /// Returns `false` when the user has no memory with that id.
    pub async fn forget(&self, user_id: &str, id: &str) -> Result<bool> {
        let removed = self.store.delete(user_id, id).await.map_err(Error::memory)?;
        if removed {
            info!(%user_id, memory_id = %id, "memory deleted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use {
        super::*,
        crate::{
            store::InMemoryMemoryStore,
            testing::{FailingEmbedder, KeywordEmbedder},
        },
        chrono::{Duration, TimeZone},
    };

    fn record(id: &str, vector: Vec<f32>, importance: f32, age_secs: i64) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            user_id: "u1".into(),
            content: id.into(),
            memory_type: MemoryType::Fact,
            importance,
            vector,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                - Duration::seconds(age_secs),
            metadata: Metadata::new(),
        }
    }

    /// Embedder returning one fixed query vector, for hand-built scenarios.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait::async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimensions(&self) -> usize {
            self.0.len()
        }
    }

    async fn ranker(query: Vec<f32>, records: Vec<MemoryRecord>) -> MemoryRanker {
        let store = Arc::new(InMemoryMemoryStore::new());
        for r in &records {
            store.save(r).await.unwrap();
        }
        MemoryRanker::new(
            Arc::new(FixedEmbedder(query)),
            store,
            &MemoryConfig::default(),
        )
    }

    #[tokio::test]
    async fn importance_breaks_near_ties() {
        let ranker = ranker(vec![1.0, 0.0], vec![
            record("low", vec![1.0, 0.0], 0.1, 0),
            record("high", vec![1.0, 0.0], 0.9, 0),
        ])
        .await;

        let ranked = ranker.rank("u1", "what do I like?", 5).await.unwrap();
        let ids: Vec<&str> = ranked.iter().map(|s| s.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
        assert!((ranked[0].score - ranked[1].score).abs() < 1e-6);
    }

    #[tokio::test]
    async fn results_are_bounded_and_ordered() {
        let records = (0..10)
            .map(|i| {
                let angle = i as f32 * 0.3;
                record(
                    &format!("m{i}"),
                    vec![angle.cos(), angle.sin()],
                    (i % 3) as f32 / 3.0,
                    i,
                )
            })
            .collect();
        let ranker = ranker(vec![1.0, 0.0], records).await;

        for top_k in [0, 1, 3, 10, 50] {
            let ranked = ranker.rank("u1", "q", top_k).await.unwrap();
            assert!(ranked.len() <= top_k);
            assert!(ranked.windows(2).all(|w| ranking_order(&w[0], &w[1]) != Ordering::Greater));
        }
    }

    #[tokio::test]
    async fn empty_query_returns_everything_by_importance() {
        let ranker = ranker(vec![1.0, 0.0], vec![
            record("a", vec![1.0, 0.0], 0.2, 10),
            record("b", vec![0.0, 1.0], 0.8, 10),
            record("c", vec![0.5, 0.5], 0.2, 0),
        ])
        .await;

        let ranked = ranker.rank("u1", "", 10).await.unwrap();
        assert!(ranked.iter().all(|s| s.score == 0.0));
        let ids: Vec<&str> = ranked.iter().map(|s| s.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        assert_eq!(ranker.rank("u1", "   ", 2).await.unwrap().len(), 2);
        assert_eq!(ranker.list("u1", 50).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_skipped() {
        let ranker = ranker(vec![1.0, 0.0], vec![
            record("ok", vec![1.0, 0.0], 0.5, 0),
            record("stale", vec![1.0, 0.0, 0.0], 0.5, 0),
        ])
        .await;
        let ranked = ranker.rank("u1", "q", 5).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].memory.id, "ok");

        let listed = ranker.list("u1", 5).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[tokio::test]
    async fn zero_vectors_score_zero() {
        let ranker = ranker(vec![1.0, 0.0], vec![record("zero", vec![0.0, 0.0], 0.5, 0)]).await;
        let ranked = ranker.rank("u1", "q", 5).await.unwrap();
        assert_eq!(ranked[0].score, 0.0);
    }

    #[tokio::test]
    async fn unknown_user_has_no_memories() {
        let ranker = ranker(vec![1.0, 0.0], vec![record("a", vec![1.0, 0.0], 0.5, 0)]).await;
        assert!(ranker.rank("nobody", "q", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remember_then_rank_by_topic() {
        let ranker = MemoryRanker::new(
            Arc::new(KeywordEmbedder::topics()),
            Arc::new(InMemoryMemoryStore::new()),
            &MemoryConfig::default(),
        );
        ranker
            .remember("u1", NewMemory::new("I love cooking pasta"))
            .await
            .unwrap();
        let music = ranker
            .remember(
                "u1",
                NewMemory::new("Jazz music helps me focus")
                    .with_type(MemoryType::Preference)
                    .with_importance(0.9),
            )
            .await
            .unwrap();
        assert_eq!(music.memory_type, MemoryType::Preference);

        let ranked = ranker.rank("u1", "any music tips?", 1).await.unwrap();
        assert_eq!(ranked[0].memory.id, music.id);

        assert!(ranker.forget("u1", &music.id).await.unwrap());
        assert!(!ranker.forget("u1", &music.id).await.unwrap());
        assert_eq!(ranker.list("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remember_validates_input() {
        let ranker = MemoryRanker::new(
            Arc::new(KeywordEmbedder::topics()),
            Arc::new(InMemoryMemoryStore::new()),
            &MemoryConfig::default(),
        );
        for bad in [
            NewMemory::new("  "),
            NewMemory::new("fine").with_importance(1.5),
            NewMemory::new("fine").with_importance(-0.1),
            NewMemory::new("fine").with_importance(f32::NAN),
        ] {
            let err = ranker.remember("u1", bad).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn embedder_failure_is_memory_unavailable() {
        let ranker = MemoryRanker::new(
            Arc::new(FailingEmbedder { dims: 2 }),
            Arc::new(InMemoryMemoryStore::new()),
            &MemoryConfig::default(),
        );
        let err = ranker.rank("u1", "q", 5).await.unwrap_err();
        assert!(matches!(err, Error::MemoryUnavailable(_)));
        assert!(err.is_degradable());

        // A blank query never reaches the embedder.
        assert!(ranker.rank("u1", "", 5).await.unwrap().is_empty());
    }
}
