//! One chat turn, end to end: history → retrieval and memory ranking →
//! context assembly → generation → history append.
//!
//! Retrieval and memory failures are handled by one [`FailurePolicy`]:
//! `Degrade` continues with an empty section and reports the stage in the
//! response, `Abort` fails the request. History and generation failures
//! always fail the request.

use std::{pin::Pin, sync::Arc};

use {
    futures::{Stream, StreamExt},
    lore_common::{Error, Result, types::Metadata},
    lore_config::{FailurePolicy, LoreConfig},
    lore_memory::{ConversationTurn, KnowledgeBase, RetrievalResult, ScoredMemory},
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    context::{AssembledContext, AssemblyReport, AssemblyRequest, ContextAssembler},
    model::{StreamEvent, Usage},
    provider::LlmProvider,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    /// Falls back to `chat.use_rag`.
    #[serde(default)]
    pub use_rag: Option<bool>,
    /// Falls back to `chat.use_memory`.
    #[serde(default)]
    pub use_memory: Option<bool>,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            use_rag: None,
            use_memory: None,
        }
    }
}

/// A stage whose failure was replaced by an empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Retrieval,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl From<&RetrievalResult> for Source {
    fn from(r: &RetrievalResult) -> Self {
        Self {
            text: r.text.clone(),
            score: r.similarity,
            metadata: r.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsed {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub importance: f32,
    pub score: f32,
}

impl From<&ScoredMemory> for MemoryUsed {
    fn from(s: &ScoredMemory) -> Self {
        Self {
            id: s.memory.id.clone(),
            content: s.memory.content.clone(),
            memory_type: s.memory.memory_type.to_string(),
            importance: s.memory.importance,
            score: s.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<Source>,
    pub memories_used: Vec<MemoryUsed>,
    pub degraded: Vec<Stage>,
    pub usage: Usage,
    pub context: AssemblyReport,
    /// `false` when the exchange could not be appended to history.
    pub history_saved: bool,
}

/// Events of [`ChatService::chat_stream`]: one `Metadata`, any number of
/// `Delta`, then exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    Metadata {
        sources: Vec<Source>,
        memories_used: Vec<MemoryUsed>,
        degraded: Vec<Stage>,
    },
    Delta {
        content: String,
    },
    Done {
        usage: Usage,
        /// `false` when the exchange could not be appended to history.
        history_saved: bool,
    },
    Error {
        message: String,
    },
}

/// Everything gathered before generation.
struct Prepared {
    context: AssembledContext,
    sources: Vec<Source>,
    memories_used: Vec<MemoryUsed>,
    degraded: Vec<Stage>,
}

pub struct ChatService {
    kb: Arc<KnowledgeBase>,
    llm: Arc<dyn LlmProvider>,
    assembler: ContextAssembler,
    policy: FailurePolicy,
    history_window: usize,
    use_rag: bool,
    use_memory: bool,
}

impl ChatService {
    pub fn new(kb: Arc<KnowledgeBase>, llm: Arc<dyn LlmProvider>, config: &LoreConfig) -> Self {
        Self {
            kb,
            llm,
            assembler: ContextAssembler::from_config(config),
            policy: config.chat.failure_policy,
            history_window: config.chat.history_window,
            use_rag: config.chat.use_rag,
            use_memory: config.chat.use_memory,
        }
    }

    /// Apply the failure policy to a degradable stage.
    fn recover<T: Default>(
        &self,
        stage: Stage,
        result: Result<T>,
        degraded: &mut Vec<Stage>,
    ) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_degradable() && self.policy == FailurePolicy::Degrade => {
                warn!(?stage, error = %e, "stage failed, continuing without it");
                degraded.push(stage);
                Ok(T::default())
            },
            Err(e) => Err(e),
        }
    }

    async fn prepare(&self, request: &ChatRequest) -> Result<Prepared> {
        if request.message.trim().is_empty() {
            return Err(Error::validation("message is empty"));
        }
        if request.user_id.trim().is_empty() {
            return Err(Error::validation("user id is empty"));
        }

        let history: Vec<ConversationTurn> = self
            .kb
            .conversations()
            .recent(&request.user_id, self.history_window)
            .await
            .map_err(Error::history)?;

        let mut degraded = Vec::new();

        let passages = if request.use_rag.unwrap_or(self.use_rag) {
            let result = self.kb.retrieval().search_default(&request.message).await;
            self.recover(Stage::Retrieval, result, &mut degraded)?
        } else {
            Vec::new()
        };

        let memories = if request.use_memory.unwrap_or(self.use_memory) {
            let result = self
                .kb
                .memories()
                .rank_default(&request.user_id, &request.message)
                .await;
            self.recover(Stage::Memory, result, &mut degraded)?
        } else {
            Vec::new()
        };

        debug!(
            user_id = %request.user_id,
            history = history.len(),
            passages = passages.len(),
            memories = memories.len(),
            "assembling context"
        );

        let context = self.assembler.assemble(AssemblyRequest {
            history: &history,
            passages: &passages,
            memories: &memories,
            query: &request.message,
        });

        Ok(Prepared {
            context,
            sources: passages.iter().map(Source::from).collect(),
            memories_used: memories.iter().map(MemoryUsed::from).collect(),
            degraded,
        })
    }

    async fn save_exchange(&self, user_id: &str, message: &str, response: &str) -> bool {
        match self
            .kb
            .conversations()
            .append_exchange(user_id, message, response)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(%user_id, error = %e, "failed to save exchange");
                false
            },
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let prepared = self.prepare(request).await?;

        let completion = self
            .llm
            .generate(
                &prepared.context.messages,
                Some(&prepared.context.system_prompt),
            )
            .await
            .map_err(Error::generation)?;

        let history_saved = self
            .save_exchange(&request.user_id, &request.message, &completion.text)
            .await;

        info!(
            user_id = %request.user_id,
            sources = prepared.sources.len(),
            memories = prepared.memories_used.len(),
            degraded = prepared.degraded.len(),
            output_tokens = completion.usage.output_tokens,
            "chat turn complete"
        );

        Ok(ChatResponse {
            response: completion.text,
            sources: prepared.sources,
            memories_used: prepared.memories_used,
            degraded: prepared.degraded,
            usage: completion.usage,
            context: prepared.context.report,
            history_saved,
        })
    }

    /// Streaming variant of [`Self::chat`]. The exchange is appended to
    /// history only once generation completes; dropping the stream early
    /// saves nothing.
    pub fn chat_stream<'a>(
        &'a self,
        request: ChatRequest,
    ) -> Pin<Box<dyn Stream<Item = ChatEvent> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            let prepared = match self.prepare(&request).await {
                Ok(p) => p,
                Err(e) => {
                    yield ChatEvent::Error { message: e.to_string() };
                    return;
                },
            };

            yield ChatEvent::Metadata {
                sources: prepared.sources,
                memories_used: prepared.memories_used,
                degraded: prepared.degraded,
            };

            let AssembledContext { system_prompt, messages, .. } = prepared.context;
            let mut events = self.llm.stream(messages, Some(system_prompt));
            let mut full = String::new();

            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Delta(content) => {
                        full.push_str(&content);
                        yield ChatEvent::Delta { content };
                    },
                    StreamEvent::Done(usage) => {
                        let history_saved = self.save_exchange(&request.user_id, &request.message, &full).await;
                        info!(user_id = %request.user_id, chars = full.len(), history_saved, "streamed chat turn complete");
                        yield ChatEvent::Done { usage, history_saved };
                        return;
                    },
                    StreamEvent::Error(message) => {
                        warn!(user_id = %request.user_id, error = %message, "generation stream failed");
                        yield ChatEvent::Error {
                            message: Error::generation(anyhow::anyhow!(message)).to_string(),
                        };
                        return;
                    },
                }
            }

            yield ChatEvent::Error {
                message: Error::generation(anyhow::anyhow!("stream ended without completion"))
                    .to_string(),
            };
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use {
        super::*,
        crate::model::{ChatMessage, Completion},
        anyhow::bail,
        async_trait::async_trait,
        lore_memory::{
            ConversationStore, ConversationTurn, EmbeddingProvider, InMemoryConversationStore,
            InMemoryMemoryStore, InMemoryVectorIndex, MemoryRecord, MemoryStore, NewMemory,
        },
        std::sync::Mutex,
    };

    const VOCAB: [&str; 6] = ["rust", "python", "music", "cooking", "tea", "coffee"];

    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(VOCAB
                .iter()
                .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
                .collect())
        }

        fn model_name(&self) -> &str {
            "keyword"
        }

        fn dimensions(&self) -> usize {
            VOCAB.len()
        }
    }

    struct DownMemoryStore;

    #[async_trait]
    impl MemoryStore for DownMemoryStore {
        async fn save(&self, _record: &MemoryRecord) -> anyhow::Result<()> {
            bail!("memory store offline")
        }

        async fn find_by_user(&self, _user_id: &str) -> anyhow::Result<Vec<MemoryRecord>> {
            bail!("memory store offline")
        }

        async fn delete(&self, _user_id: &str, _id: &str) -> anyhow::Result<bool> {
            bail!("memory store offline")
        }
    }

    struct ReadOnlyHistory;

    #[async_trait]
    impl ConversationStore for ReadOnlyHistory {
        async fn append_exchange(
            &self,
            _user_id: &str,
            _user_message: &str,
            _assistant_message: &str,
        ) -> anyhow::Result<()> {
            bail!("history is read-only")
        }

        async fn recent(
            &self,
            _user_id: &str,
            _exchanges: usize,
        ) -> anyhow::Result<Vec<ConversationTurn>> {
            Ok(Vec::new())
        }

        async fn clear(&self, _user_id: &str) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    /// Echoes the last user message and records what it was given.
    #[derive(Default)]
    struct EchoLlm {
        seen: Mutex<Vec<(String, Vec<ChatMessage>)>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn generate(
            &self,
            messages: &[ChatMessage],
            system_prompt: Option<&str>,
        ) -> anyhow::Result<Completion> {
            if self.fail {
                bail!("model overloaded");
            }
            self.seen
                .lock()
                .unwrap()
                .push((system_prompt.unwrap_or_default().to_string(), messages.to_vec()));
            Ok(Completion {
                text: "echo reply".into(),
                usage: Usage::default(),
            })
        }

        fn stream(
            &self,
            _messages: Vec<ChatMessage>,
            _system_prompt: Option<String>,
        ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
            let events = if self.fail {
                vec![StreamEvent::Delta("par".into()), StreamEvent::Error("cut off".into())]
            } else {
                vec![
                    StreamEvent::Delta("echo ".into()),
                    StreamEvent::Delta("reply".into()),
                    StreamEvent::Done(Usage::default()),
                ]
            };
            Box::pin(futures::stream::iter(events))
        }
    }

    fn config(policy: FailurePolicy) -> LoreConfig {
        let mut config = LoreConfig::default();
        config.rag.similarity_threshold = 0.0;
        config.chat.failure_policy = policy;
        config
    }

    async fn kb(config: &LoreConfig, memory_store: Arc<dyn MemoryStore>) -> Arc<KnowledgeBase> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder);
        let kb = KnowledgeBase::new(
            config,
            Arc::clone(&embedder),
            Arc::new(InMemoryVectorIndex::new(VOCAB.len())),
            memory_store,
            Arc::new(InMemoryConversationStore::new()),
        );
        kb.add_documents(&["Rust ownership rules".into(), "Cooking with tea".into()], &[])
            .await
            .unwrap();
        Arc::new(kb)
    }

    async fn healthy_kb(config: &LoreConfig) -> Arc<KnowledgeBase> {
        let kb = kb(config, Arc::new(InMemoryMemoryStore::new())).await;
        kb.remember("u1", NewMemory::new("Prefers green tea over coffee"))
            .await
            .unwrap();
        kb
    }

    #[tokio::test]
    async fn chat_uses_passages_memories_and_saves_history() {
        let config = config(FailurePolicy::Degrade);
        let kb = healthy_kb(&config).await;
        let llm = Arc::new(EchoLlm::default());
        let service = ChatService::new(Arc::clone(&kb), llm.clone(), &config);

        let response = service
            .chat(&ChatRequest::new("u1", "Any tea recipes?"))
            .await
            .unwrap();
        assert_eq!(response.response, "echo reply");
        assert!(response.degraded.is_empty());
        assert!(response.history_saved);
        assert_eq!(response.sources[0].text, "Cooking with tea");
        assert_eq!(response.memories_used.len(), 1);

        let seen = llm.seen.lock().unwrap();
        let (system, messages) = &seen[0];
        assert!(system.contains("1. Prefers green tea over coffee"));
        assert!(messages.last().unwrap().content.contains("[Document 1]: Cooking with tea"));
        drop(seen);

        let history = kb.conversations().recent("u1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "echo reply");
    }

    #[tokio::test]
    async fn history_feeds_the_next_turn() {
        let config = config(FailurePolicy::Degrade);
        let kb = healthy_kb(&config).await;
        let llm = Arc::new(EchoLlm::default());
        let service = ChatService::new(kb, llm.clone(), &config);

        service.chat(&ChatRequest::new("u1", "first")).await.unwrap();
        service.chat(&ChatRequest::new("u1", "second")).await.unwrap();

        let seen = llm.seen.lock().unwrap();
        let messages = &seen[1].1;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::user("first"));
        assert_eq!(messages[1], ChatMessage::assistant("echo reply"));
    }

    #[tokio::test]
    async fn memory_failure_degrades_under_degrade_policy() {
        let config = config(FailurePolicy::Degrade);
        let kb = kb(&config, Arc::new(DownMemoryStore)).await;
        let service = ChatService::new(kb, Arc::new(EchoLlm::default()), &config);

        let response = service
            .chat(&ChatRequest::new("u1", "rust question"))
            .await
            .unwrap();
        assert_eq!(response.degraded, vec![Stage::Memory]);
        assert!(response.memories_used.is_empty());
        assert!(!response.sources.is_empty());
    }

    #[tokio::test]
    async fn memory_failure_aborts_under_abort_policy() {
        let config = config(FailurePolicy::Abort);
        let kb = kb(&config, Arc::new(DownMemoryStore)).await;
        let service = ChatService::new(kb, Arc::new(EchoLlm::default()), &config);

        let err = service
            .chat(&ChatRequest::new("u1", "rust question"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MemoryUnavailable(_)), "{err}");
    }

    #[tokio::test]
    async fn disabled_stages_are_not_consulted() {
        let config = config(FailurePolicy::Abort);
        let kb = kb(&config, Arc::new(DownMemoryStore)).await;
        let service = ChatService::new(kb, Arc::new(EchoLlm::default()), &config);

        let mut request = ChatRequest::new("u1", "rust question");
        request.use_memory = Some(false);
        request.use_rag = Some(false);
        let response = service.chat(&request).await.unwrap();
        assert!(response.sources.is_empty());
        assert!(response.degraded.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_is_reported_and_not_saved() {
        let config = config(FailurePolicy::Degrade);
        let kb = healthy_kb(&config).await;
        let llm = Arc::new(EchoLlm {
            fail: true,
            ..Default::default()
        });
        let service = ChatService::new(Arc::clone(&kb), llm, &config);

        let err = service
            .chat(&ChatRequest::new("u1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GenerationUnavailable(_)));
        assert!(kb.conversations().recent("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let config = config(FailurePolicy::Degrade);
        let service = ChatService::new(
            healthy_kb(&config).await,
            Arc::new(EchoLlm::default()),
            &config,
        );
        let err = service.chat(&ChatRequest::new("u1", "  ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn stream_emits_metadata_deltas_done_and_saves() {
        let config = config(FailurePolicy::Degrade);
        let kb = healthy_kb(&config).await;
        let service = ChatService::new(Arc::clone(&kb), Arc::new(EchoLlm::default()), &config);

        let events: Vec<ChatEvent> = service
            .chat_stream(ChatRequest::new("u1", "tea?"))
            .collect()
            .await;
        assert!(matches!(events[0], ChatEvent::Metadata { .. }));
        assert!(matches!(
            events.last(),
            Some(ChatEvent::Done {
                history_saved: true,
                ..
            })
        ));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Delta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "echo reply");

        let history = kb.conversations().recent("u1", 10).await.unwrap();
        assert_eq!(history[1].content, "echo reply");
    }

    #[tokio::test]
    async fn stream_error_does_not_save() {
        let config = config(FailurePolicy::Degrade);
        let kb = healthy_kb(&config).await;
        let llm = Arc::new(EchoLlm {
            fail: true,
            ..Default::default()
        });
        let service = ChatService::new(Arc::clone(&kb), llm, &config);

        let events: Vec<ChatEvent> = service
            .chat_stream(ChatRequest::new("u1", "tea?"))
            .collect()
            .await;
        assert!(matches!(events.last(), Some(ChatEvent::Error { .. })));
        assert!(kb.conversations().recent("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_stream_does_not_save() {
        let config = config(FailurePolicy::Degrade);
        let kb = healthy_kb(&config).await;
        let service = ChatService::new(Arc::clone(&kb), Arc::new(EchoLlm::default()), &config);

        {
            let mut stream = service.chat_stream(ChatRequest::new("u1", "tea?"));
            let first = stream.next().await.unwrap();
            assert!(matches!(first, ChatEvent::Metadata { .. }));
            assert!(matches!(stream.next().await, Some(ChatEvent::Delta { .. })));
        }
        assert!(kb.conversations().recent("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsaved_history_is_reported_by_both_paths() {
        let config = config(FailurePolicy::Degrade);
        let kb = Arc::new(KnowledgeBase::new(
            &config,
            Arc::new(KeywordEmbedder),
            Arc::new(InMemoryVectorIndex::new(VOCAB.len())),
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(ReadOnlyHistory),
        ));
        let service = ChatService::new(kb, Arc::new(EchoLlm::default()), &config);

        let response = service.chat(&ChatRequest::new("u1", "tea?")).await.unwrap();
        assert!(!response.history_saved);

        let events: Vec<ChatEvent> = service
            .chat_stream(ChatRequest::new("u1", "tea?"))
            .collect()
            .await;
        assert!(matches!(
            events.last(),
            Some(ChatEvent::Done {
                history_saved: false,
                ..
            })
        ));
    }

    #[test]
    fn chat_events_serialize_with_type_tag() {
        let json = serde_json::to_value(ChatEvent::Delta {
            content: "hi".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "delta", "content": "hi"}));
    }
}
