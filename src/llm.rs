//! Chat-completion provider abstraction.
//!
//! Defines the [`ChatProvider`] trait and its implementations:
//! - **[`DisabledChatProvider`]**: every call fails; used when `llm.provider = "disabled"`.
//! - **[`OpenAiChatProvider`]**: OpenAI-compatible `POST /chat/completions`,
//!   plain and streamed (server-sent events).
//! - **[`LimitedProvider`]**: wraps any provider behind a FIFO semaphore so
//!   at most `llm.max_concurrency` model calls are in flight process-wide.
//!   A streamed call holds its permit until the stream is dropped.
//!
//! # Stream Parsing
//!
//! The upstream event stream is a sequence of `data: <json>` lines. Each
//! JSON payload carries `choices[0].delta.content`; the literal
//! `data: [DONE]` ends the stream. Lines may be split across network
//! chunks, so bytes are buffered until a full line is available.

use std::sync::Arc;
use std::time::Duration;

use advisory_core::models::ConversationTurn;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::LlmConfig;

/// Sampling options for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    /// Defaults for non-streamed completions.
    pub fn completion(config: &LlmConfig) -> Self {
        Self::new(&config.completion_model, config.temperature, config.max_tokens)
    }

    /// Defaults for streamed chat turns.
    pub fn chat(config: &LlmConfig) -> Self {
        Self::new(&config.chat_model, config.temperature, config.max_tokens)
    }
}

/// Stream of answer fragments.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Returns the full completion text.
    async fn complete(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<String>;

    /// Returns the completion as a stream of text fragments.
    async fn stream(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<FragmentStream>;
}

// ============ Disabled Provider ============

pub struct DisabledChatProvider;

#[async_trait]
impl ChatProvider for DisabledChatProvider {
    async fn complete(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<String> {
        bail!("LLM provider is disabled")
    }

    async fn stream(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<FragmentStream> {
        bail!("LLM provider is disabled")
    }
}

// ============ OpenAI Provider ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// OpenAI-compatible chat completions over HTTP.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiChatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn send(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &options.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn complete(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<String> {
        let json: serde_json::Value = self.send(messages, options, false).await?.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(content)
    }

    async fn stream(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<FragmentStream> {
        let response = self.send(messages, options, true).await?;
        let bytes = response.bytes_stream();

        let fragments = stream::unfold(
            (bytes, SseLineBuffer::default(), false),
            |(mut bytes, mut buffer, mut done)| async move {
                loop {
                    if done {
                        return None;
                    }
                    if let Some(event) = buffer.next_event() {
                        match event {
                            SseEvent::Done => {
                                done = true;
                                continue;
                            }
                            SseEvent::Fragment(text) => {
                                return Some((Ok(text), (bytes, buffer, done)));
                            }
                        }
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => buffer.push(&chunk),
                        Some(Err(e)) => {
                            done = true;
                            return Some((
                                Err(anyhow!("stream read failed: {}", e)),
                                (bytes, buffer, done),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(fragments.boxed())
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragment(String),
    Done,
}

/// Accumulates raw bytes and yields parsed `data:` events line by line.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_sse_line(line.trim()) {
                return Some(event);
            }
        }
        None
    }
}

/// Parse one event-stream line. Blank lines, comments, and deltas
/// without content yield `None`.
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let json: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "skipping unparseable stream line");
            return None;
        }
    };
    json.pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| SseEvent::Fragment(c.to_string()))
}

// ============ Concurrency cap ============

/// Caps concurrent model calls across every caller sharing this value.
///
/// Tokio's semaphore is fair, so waiters are admitted in FIFO order.
pub struct LimitedProvider {
    inner: Arc<dyn ChatProvider>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl LimitedProvider {
    pub fn new(inner: Arc<dyn ChatProvider>, max_concurrency: usize) -> Self {
        let limit = max_concurrency.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }
}

#[async_trait]
impl ChatProvider for LimitedProvider {
    async fn complete(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("model concurrency limiter closed")?;
        self.inner.complete(messages, options).await
    }

    async fn stream(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<FragmentStream> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("model concurrency limiter closed")?;
        let inner = self.inner.stream(messages, options).await?;
        // The permit moves into the stream and is released when it is dropped.
        let guarded = inner.map(move |item| {
            let _held = &permit;
            item
        });
        Ok(guarded.boxed())
    }
}

/// Create the provider named by `llm.provider`, wrapped in the shared
/// concurrency cap.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn ChatProvider>> {
    let inner: Arc<dyn ChatProvider> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledChatProvider),
        "openai" => Arc::new(OpenAiChatProvider::new(config)?),
        other => bail!("Unknown llm provider: {}", other),
    };
    Ok(Arc::new(LimitedProvider::new(inner, config.max_concurrency)))
}
