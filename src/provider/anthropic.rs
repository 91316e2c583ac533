use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consts::DEFAULT_ANTHROPIC_MODEL;
use crate::credentials::CredentialStore;

use super::{
    AiMessage, AiProvider, AiResponse, CompletionOptions, ContentPart, MessageContent,
    MessageRole, ModelInfo, ProviderKind, Usage,
};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

/// Calls the Anthropic Messages API.
pub struct AnthropicProvider {
    model: String,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: Option<String>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            model: model.unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            credentials,
            client: reqwest::Client::new(),
        }
    }

    /// System messages go to the top-level `system` field; everything else
    /// becomes a content-block message.
    fn build_request(&self, messages: &[AiMessage], options: &CompletionOptions) -> ApiRequest {
        let mut system = Vec::new();
        let mut api_messages = Vec::new();

        for message in messages {
            match message.role {
                MessageRole::System => system.push(message.content.to_text()),
                MessageRole::User | MessageRole::Assistant => api_messages.push(ApiMessage {
                    role: if message.role == MessageRole::User {
                        "user"
                    } else {
                        "assistant"
                    },
                    content: to_blocks(&message.content),
                }),
            }
        }

        ApiRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens.unwrap_or(MAX_TOKENS),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: api_messages,
            temperature: options.temperature,
            top_p: options.top_p,
            stop_sequences: options.stop.clone(),
        }
    }

    fn into_response(&self, api_resp: ApiResponse) -> Result<AiResponse> {
        let text: String = api_resp
            .content
            .iter()
            .filter_map(|block| {
                if block.content_type == "text" {
                    block.text.as_deref()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            bail!("Anthropic API returned empty response");
        }

        let usage = api_resp
            .usage
            .map(|u| Usage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        let mut metadata = Map::new();
        if let Some(id) = api_resp.id {
            metadata.insert("id".to_string(), Value::String(id));
        }

        Ok(AiResponse {
            content: text,
            model: api_resp.model.unwrap_or_else(|| self.model.clone()),
            usage,
            finish_reason: api_resp.stop_reason,
            metadata,
        })
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        ProviderKind::Anthropic.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        messages: &[AiMessage],
        options: &CompletionOptions,
    ) -> Result<AiResponse> {
        let kind = ProviderKind::Anthropic;
        let api_key = self
            .credentials
            .get_api_key(kind.as_str(), kind.env_var())?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no Anthropic credentials found. Run `slidewright set-key anthropic <key>` or set {}.",
                    kind.env_var()
                )
            })?;

        let body = self.build_request(messages, options);

        let resp = self
            .client
            .post(API_URL)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", &api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic API error ({}): {}", status, text);
        }

        let api_resp: ApiResponse = resp.json().await?;
        let response = self.into_response(api_resp)?;
        log::debug!(
            "anthropic usage: input {}, output {}",
            response.usage.prompt_tokens,
            response.usage.completion_tokens
        );
        Ok(response)
    }

    fn model_info(&self) -> ModelInfo {
        let mut config = Map::new();
        config.insert("api_url".to_string(), Value::from(API_URL));
        config.insert("max_tokens".to_string(), Value::from(MAX_TOKENS));
        ModelInfo {
            model: self.model.clone(),
            provider: self.name().to_string(),
            config,
        }
    }
}

fn to_blocks(content: &MessageContent) -> Vec<ApiBlock> {
    match content {
        MessageContent::Text(text) => vec![ApiBlock::Text { text: text.clone() }],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => ApiBlock::Text { text: text.clone() },
                ContentPart::ImageUrl { image_url } => ApiBlock::Image {
                    source: match parse_data_url(&image_url.url) {
                        Some((media_type, data)) => ImageSource::Base64 {
                            media_type: media_type.to_string(),
                            data: data.to_string(),
                        },
                        None => ImageSource::Url {
                            url: image_url.url.clone(),
                        },
                    },
                },
            })
            .collect(),
    }
}

/// Split `data:<mime>;base64,<payload>` into mime and payload.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    url.strip_prefix("data:")?.split_once(";base64,")
}

// --- API types ---

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Deserialize)]
struct ApiResponse {
    id: Option<String>,
    model: Option<String>,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}
