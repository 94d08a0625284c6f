use std::pin::Pin;

use {async_trait::async_trait, futures::Stream};

use crate::model::{ChatMessage, Completion, StreamEvent};

/// Text generation capability.
///
/// For identical input, the `Delta` fragments of [`Self::stream`]
/// concatenate to the text [`Self::generate`] returns.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider family, e.g. `openai` or `local`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> anyhow::Result<Completion>;

    /// Dropping the returned stream cancels the underlying request.
    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: Option<String>,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>>;
}
