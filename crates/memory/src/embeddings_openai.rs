/// Embeddings over any OpenAI-compatible `/v1/embeddings` endpoint
/// (OpenAI itself, or local servers such as vLLM, Ollama or TEI).
use async_trait::async_trait;
use {
    anyhow::{Context, bail},
    lore_config::EmbeddingsConfig,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tracing::debug,
};

use crate::embeddings::EmbeddingProvider;

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: Option<Secret<String>>,
    base_url: String,
    model: String,
    dims: usize,
    provider_key: String,
}

fn compute_provider_key(base_url: &str, model: &str, dims: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"openai-compatible:");
    hasher.update(base_url.as_bytes());
    hasher.update(b":");
    hasher.update(model.as_bytes());
    hasher.update(dims.to_le_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// `true` when the last path segment looks like `v1`, `v4`, ...
fn has_version_suffix(base_url: &str) -> bool {
    base_url
        .rsplit('/')
        .next()
        .and_then(|segment| segment.strip_prefix('v'))
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        normalized
    } else if has_version_suffix(&normalized) {
        format!("{normalized}/embeddings")
    } else {
        format!("{normalized}/v1/embeddings")
    }
}

impl OpenAiEmbeddingProvider {
    pub fn new(base_url: impl AsRef<str>, model: impl Into<String>, dims: usize) -> Self {
        let base_url = normalize_base_url(base_url.as_ref());
        let model = model.into();
        let provider_key = compute_provider_key(&base_url, &model, dims);
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            base_url,
            model,
            dims,
            provider_key,
        }
    }

    /// Build from config; the key is looked up by the caller so tests and
    /// the CLI decide where secrets come from.
    pub fn from_config(config: &EmbeddingsConfig, api_key: Option<String>) -> Self {
        let provider = Self::new(&config.base_url, config.model.clone(), config.dimensions);
        match api_key {
            Some(key) if !key.is_empty() => provider.with_api_key(key),
            _ => provider,
        }
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(Secret::new(api_key));
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .context("empty embedding response")
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = embeddings_endpoint(&self.base_url);
        debug!(%endpoint, model = %self.model, count = texts.len(), "requesting embeddings");

        let mut request = self.client.post(&endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("embedding request to {endpoint} failed"))?
            .error_for_status()?
            .json::<EmbeddingResponse>()
            .await
            .context("malformed embedding response")?;

        if resp.data.len() != texts.len() {
            bail!(
                "embedding response has {} vectors for {} inputs",
                resp.data.len(),
                texts.len()
            );
        }

        // Servers may answer out of order; `index` is authoritative when present.
        let mut data = resp.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }

        let mut vectors = Vec::with_capacity(data.len());
        for d in data {
            if d.embedding.len() != self.dims {
                bail!(
                    "model {} returned {} dimensions, expected {}",
                    self.model,
                    d.embedding.len(),
                    self.dims
                );
            }
            vectors.push(d.embedding);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("http://localhost:8000/v1/"),
            "http://localhost:8000/v1/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("https://open.bigmodel.cn/api/paas/v4"),
            "https://open.bigmodel.cn/api/paas/v4/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("https://api.example.com/v1/embeddings"),
            "https://api.example.com/v1/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("http://localhost:11434/version"),
            "http://localhost:11434/version/v1/embeddings"
        );
    }

    #[test]
    fn provider_key_changes_with_model_and_dims() {
        let a = OpenAiEmbeddingProvider::new("https://api.openai.com", "m1", 3);
        let b = OpenAiEmbeddingProvider::new("https://api.openai.com", "m2", 3);
        let c = OpenAiEmbeddingProvider::new("https://api.openai.com", "m1", 4);
        assert_eq!(a.provider_key().len(), 16);
        assert_ne!(a.provider_key(), b.provider_key());
        assert_ne!(a.provider_key(), c.provider_key());
    }

    #[tokio::test]
    async fn batch_is_reordered_by_index() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[
                    {"index":1,"embedding":[0.0,1.0]},
                    {"index":0,"embedding":[1.0,0.0]}
                ]}"#,
            )
            .create_async()
            .await;

        let provider =
            OpenAiEmbeddingProvider::new(server.url(), "test-model", 2).with_api_key("sk-test".into());
        let vectors = provider
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn wrong_dimension_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"index":0,"embedding":[1.0,0.0,0.0]}]}"#)
            .create_async()
            .await;

        let provider = OpenAiEmbeddingProvider::new(server.url(), "test-model", 2);
        let err = provider.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("3 dimensions"), "{err}");
    }

    #[tokio::test]
    async fn http_error_is_propagated() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(503)
            .create_async()
            .await;

        let provider = OpenAiEmbeddingProvider::new(server.url(), "test-model", 2);
        assert!(provider.embed("hello").await.is_err());
    }

    #[tokio::test]
    async fn empty_batch_skips_the_request() {
        let provider = OpenAiEmbeddingProvider::new("http://127.0.0.1:9", "m", 2);
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
