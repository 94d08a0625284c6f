use std::{pin::Pin, time::Duration};

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    futures::{Stream, StreamExt},
    lore_config::LlmConfig,
    secrecy::{ExposeSecret, Secret},
    serde_json::{Value, json},
    tracing::{debug, info, warn},
};

use crate::{
    model::{ChatMessage, Completion, StreamEvent},
    provider::LlmProvider,
    providers::openai_compat::{
        SseLineBuffer, SseLineResult, StreamingState, finalize_stream, parse_completion,
        process_openai_sse_line, to_openai_messages,
    },
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const LOCAL_BASE_URL: &str = "http://localhost:8000/v1";

/// Where requests go and whether a key is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub provider: &'static str,
    pub base_url: String,
    pub requires_key: bool,
}

/// Resolve the endpoint from configuration.
///
/// An explicit `base_url` (or provider `local`) means a self-hosted server
/// that needs no key; provider `dashscope` or a Qwen model selects DashScope's
/// compatible mode; anything else is OpenAI.
pub fn resolve_endpoint(config: &LlmConfig) -> Endpoint {
    let provider = config.provider.to_ascii_lowercase();
    if provider == "local" || config.base_url.is_some() {
        return Endpoint {
            provider: "local",
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| LOCAL_BASE_URL.to_string()),
            requires_key: false,
        };
    }
    if provider == "dashscope" || config.model.to_ascii_lowercase().contains("qwen") {
        return Endpoint {
            provider: "dashscope",
            base_url: DASHSCOPE_BASE_URL.to_string(),
            requires_key: true,
        };
    }
    Endpoint {
        provider: "openai",
        base_url: OPENAI_BASE_URL.to_string(),
        requires_key: true,
    }
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<Secret<String>>,
    base_url: String,
    provider: &'static str,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(base_url: impl AsRef<str>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            base_url: base_url.as_ref().trim().trim_end_matches('/').to_string(),
            provider: "openai",
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    /// Build from config. Fails when the resolved endpoint needs a key and
    /// none was supplied.
    pub fn from_config(config: &LlmConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let endpoint = resolve_endpoint(config);
        let api_key = api_key.filter(|k| !k.is_empty());
        if endpoint.requires_key && api_key.is_none() {
            bail!(
                "{} requires an API key; set {}",
                endpoint.provider,
                config.api_key_env
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build http client")?;

        let mut provider = Self::new(&endpoint.base_url, config.model.clone())
            .with_client(client)
            .with_sampling(config.temperature, config.max_tokens);
        provider.provider = endpoint.provider;
        if let Some(key) = api_key {
            provider = provider.with_api_key(key);
        }
        info!(
            provider = provider.provider,
            model = %provider.model,
            base_url = %provider.base_url,
            "initialised llm provider"
        );
        Ok(provider)
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(Secret::new(api_key));
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        request
    }

    fn body(&self, messages: &[ChatMessage], system_prompt: Option<&str>, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_openai_messages(messages, system_prompt),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> anyhow::Result<Completion> {
        debug!(model = %self.model, messages = messages.len(), "chat completion");
        let resp = self
            .request(&self.body(messages, system_prompt, false))
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.endpoint()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} API error HTTP {status}: {text}", self.provider);
        }

        let body: Value = resp.json().await.context("malformed completion response")?;
        let completion = parse_completion(&body).context("completion has no message content")?;
        debug!(
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "chat completion done"
        );
        Ok(completion)
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: Option<String>,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let body = self.body(&messages, system_prompt.as_deref(), true);
            let resp = match self.request(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamEvent::Error(format!("request failed: {e}"));
                    return;
                },
            };

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                yield StreamEvent::Error(format!("HTTP {status}: {text}"));
                return;
            }

            let mut state = StreamingState::default();
            let mut lines = SseLineBuffer::default();
            let mut byte_stream = resp.bytes_stream();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "stream interrupted");
                        yield StreamEvent::Error(e.to_string());
                        return;
                    },
                };

                for data in lines.push(&chunk) {
                    match process_openai_sse_line(&data, &mut state) {
                        SseLineResult::Done => {
                            yield finalize_stream(&state);
                            return;
                        },
                        SseLineResult::Events(events) => {
                            for event in events {
                                let is_error = matches!(event, StreamEvent::Error(_));
                                yield event;
                                if is_error {
                                    return;
                                }
                            }
                        },
                        SseLineResult::Skip => {},
                    }
                }
            }

            // Some servers close the connection without a [DONE] marker.
            yield finalize_stream(&state);
        })
    }
}
