pub mod anthropic;
pub mod mock;
pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::ValueEnum;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consts::{DEFAULT_ANTHROPIC_MODEL, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
use crate::credentials::CredentialStore;

use anthropic::AnthropicProvider;
use openai::OpenAiProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `data:image/png;base64,...` or a plain http(s) URL.
    pub url: String,
}

/// One block of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }

    /// Inline image as a base64 data URL.
    pub fn image_from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self::image_url(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
    }
}

/// Plain text, or a list of text/image parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The text parts joined with newlines. Images are skipped.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AiMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }
}

/// Token usage from a single call, in OpenAI naming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another usage into this one.
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Rough usage for vendors that don't report it: whitespace-separated words.
pub fn estimate_usage(prompt: &str, response: &str) -> Usage {
    Usage::new(
        prompt.split_whitespace().count() as u64,
        response.split_whitespace().count() as u64,
    )
}

/// What every provider hands back, whatever the vendor format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub model: String,
    pub usage: Usage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Sampling knobs passed through to the vendor. `None` means vendor default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub stop: Vec<String>,
}

/// Model description without secrets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub model: String,
    pub provider: String,
    pub config: Map<String, Value>,
}

/// An AI vendor behind a common message/response shape.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn chat_completion(
        &self,
        messages: &[AiMessage],
        options: &CompletionOptions,
    ) -> Result<AiResponse>;

    async fn text_completion(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<AiResponse> {
        self.chat_completion(&[AiMessage::user(prompt)], options)
            .await
    }

    /// Default: the whole response as a single chunk.
    async fn stream_chat_completion(
        &self,
        messages: &[AiMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.chat_completion(messages, options).await?;
        Ok(futures::stream::once(async move { Ok(response.content) }).boxed())
    }

    /// Default: the whole text completion as a single chunk.
    async fn stream_text_completion(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.text_completion(prompt, options).await?;
        Ok(futures::stream::once(async move { Ok(response.content) }).boxed())
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model: self.model().to_string(),
            provider: self.name().to_string(),
            config: Map::new(),
        }
    }
}

/// Vendors selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[value(name = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| anyhow::anyhow!("unknown provider: {s} (expected anthropic or openai)"))
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            ProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
        }
    }

    /// Environment variable consulted when no key is stored.
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: Option<String>,
    /// Only used by OpenAI-compatible endpoints.
    pub base_url: Option<String>,
}

/// Construct the configured provider. The choice is made once, here.
pub fn build_provider(
    config: &ProviderConfig,
    credentials: Arc<CredentialStore>,
) -> Arc<dyn AiProvider> {
    match config.kind {
        ProviderKind::Anthropic => {
            Arc::new(AnthropicProvider::new(config.model.clone(), credentials))
        }
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            config.model.clone(),
            config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            credentials,
        )),
    }
}
