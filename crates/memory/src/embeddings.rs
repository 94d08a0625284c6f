/// Embedding capability: maps text to fixed-dimension vectors.
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    ///
    /// The default embeds one text at a time; HTTP providers override this
    /// with a single batched request.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str;

    /// Dimension of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Stable key identifying provider + model, used to tell vectors from
    /// different models apart.
    fn provider_key(&self) -> &str {
        self.model_name()
    }
}
