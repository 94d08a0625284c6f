//! Memory and conversation persistence capabilities, with in-process
//! implementations. SQLite-backed versions live in [`crate::store_sqlite`].

use std::{collections::HashMap, fmt, str::FromStr};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    lore_common::types::{Metadata, Role},
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
};

/// Kind of a memory. Open-ended: unknown kinds are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryType {
    #[default]
    Fact,
    Preference,
    Event,
    Other(String),
}

impl MemoryType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Event => "event",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MemoryType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" => Self::Fact,
            "preference" => Self::Preference,
            "event" => Self::Event,
            _ => Self::Other(s),
        }
    }
}

impl From<MemoryType> for String {
    fn from(t: MemoryType) -> Self {
        t.as_str().to_string()
    }
}

impl FromStr for MemoryType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored personal memory. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    /// Weight in `[0, 1]`, used to break ranking ties.
    pub importance: f32,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save(&self, record: &MemoryRecord) -> anyhow::Result<()>;

    /// Every memory of `user_id`, in no particular order.
    async fn find_by_user(&self, user_id: &str) -> anyhow::Result<Vec<MemoryRecord>>;

    /// Returns `false` when no such memory exists for that user.
    async fn delete(&self, user_id: &str, id: &str) -> anyhow::Result<bool>;
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// History collaborator: stores exchanges, returns them as turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_exchange(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> anyhow::Result<()>;

    /// The last `exchanges` exchanges as turns, oldest first.
    async fn recent(&self, user_id: &str, exchanges: usize)
    -> anyhow::Result<Vec<ConversationTurn>>;

    /// Drop all history for a user; returns removed exchanges.
    async fn clear(&self, user_id: &str) -> anyhow::Result<usize>;
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn save(&self, record: &MemoryRecord) -> anyhow::Result<()> {
        self.records
            .write()
            .await
            .entry(record.user_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str) -> anyhow::Result<Vec<MemoryRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, user_id: &str, id: &str) -> anyhow::Result<bool> {
        let mut records = self.records.write().await;
        let Some(list) = records.get_mut(user_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        Ok(list.len() != before)
    }
}

struct Exchange {
    user: String,
    assistant: String,
    at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    exchanges: RwLock<HashMap<String, Vec<Exchange>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Expand exchanges (oldest first) into alternating user/assistant turns.
pub(crate) fn exchanges_to_turns<I>(exchanges: I) -> Vec<ConversationTurn>
where
    I: IntoIterator<Item = (String, String, DateTime<Utc>)>,
{
    exchanges
        .into_iter()
        .flat_map(|(user, assistant, at)| {
            [
                ConversationTurn {
                    role: Role::User,
                    content: user,
                    timestamp: at,
                },
                ConversationTurn {
                    role: Role::Assistant,
                    content: assistant,
                    timestamp: at,
                },
            ]
        })
        .collect()
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append_exchange(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> anyhow::Result<()> {
        self.exchanges
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(Exchange {
                user: user_message.to_string(),
                assistant: assistant_message.to_string(),
                at: Utc::now(),
            });
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        exchanges: usize,
    ) -> anyhow::Result<Vec<ConversationTurn>> {
        let all = self.exchanges.read().await;
        let Some(list) = all.get(user_id) else {
            return Ok(Vec::new());
        };
        let skip = list.len().saturating_sub(exchanges);
        Ok(exchanges_to_turns(
            list[skip..]
                .iter()
                .map(|e| (e.user.clone(), e.assistant.clone(), e.at)),
        ))
    }

    async fn clear(&self, user_id: &str) -> anyhow::Result<usize> {
        Ok(self
            .exchanges
            .write()
            .await
            .remove(user_id)
            .map_or(0, |l| l.len()))
    }
}
