use serde::{Deserialize, Serialize};

use crate::provider::{AiMessage, AiResponse, CompletionOptions, MessageContent, MessageRole};

pub use crate::provider::Usage as UsageInfo;

/// Maximum number of stop sequences a request may carry.
pub const MAX_STOP_SEQUENCES: usize = 4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field} {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<ChatMessage> for AiMessage {
    fn from(msg: ChatMessage) -> Self {
        AiMessage {
            role: msg.role,
            content: MessageContent::Text(msg.content),
            name: msg.name,
        }
    }
}

/// `"stop": "x"` or `"stop": ["x", "y"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }

    fn len(&self) -> usize {
        match self {
            StopSequences::One(_) => 1,
            StopSequences::Many(v) => v.len(),
        }
    }
}

/// `"prompt": "x"` or `"prompt": ["x", "y"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    One(String),
    Many(Vec<String>),
}

impl PromptInput {
    /// Multiple prompts are sent as one, separated by blank lines.
    pub fn joined(&self) -> String {
        match self {
            PromptInput::One(s) => s.clone(),
            PromptInput::Many(v) => v.join("\n\n"),
        }
    }
}

/// Sampling fields shared by both request kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub n: Option<i64>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub stop: Option<StopSequences>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub user: Option<String>,
}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        if let Some(max_tokens) = self.max_tokens
            && max_tokens <= 0
        {
            return Err(ValidationError::new("max_tokens", "must be greater than 0"));
        }
        if let Some(n) = self.n
            && !(1..=128).contains(&n)
        {
            return Err(ValidationError::new("n", "must be between 1 and 128"));
        }
        if let Some(stop) = &self.stop
            && stop.len() > MAX_STOP_SEQUENCES
        {
            return Err(ValidationError::new(
                "stop",
                format!("accepts at most {MAX_STOP_SEQUENCES} sequences"),
            ));
        }
        Ok(())
    }

    /// Only the knobs the providers understand are passed on.
    pub fn to_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens.and_then(|t| u32::try_from(t).ok()),
            top_p: self.top_p,
            stop: self.stop.clone().map(StopSequences::into_vec).unwrap_or_default(),
        }
    }
}

fn check_range(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(ValidationError::new(
            field,
            format!("must be between {min} and {max}"),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl ChatCompletionRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.messages.is_empty() {
            return Err(ValidationError::new("messages", "must not be empty"));
        }
        self.params.validate()
    }

    pub fn ai_messages(&self) -> Vec<AiMessage> {
        self.messages.iter().cloned().map(AiMessage::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: PromptInput,
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl CompletionRequest {
    /// Completions default to 16 tokens when unspecified.
    pub const DEFAULT_MAX_TOKENS: i64 = 16;

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.params.validate()
    }

    pub fn options(&self) -> CompletionOptions {
        let mut options = self.params.to_options();
        if self.params.max_tokens.is_none() {
            options.max_tokens = Some(Self::DEFAULT_MAX_TOKENS as u32);
        }
        options
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: UsageInfo,
}

impl ChatCompletionResponse {
    pub fn from_ai(response: AiResponse) -> Self {
        Self {
            id: response_id("chatcmpl"),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: response.model,
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: MessageRole::Assistant,
                    content: response.content,
                    name: None,
                },
                finish_reason: response.finish_reason,
            }],
            usage: response.usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: UsageInfo,
}

impl CompletionResponse {
    pub fn from_ai(response: AiResponse) -> Self {
        Self {
            id: response_id("cmpl"),
            object: "text_completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: response.model,
            choices: vec![CompletionChoice {
                text: response.content,
                index: 0,
                finish_reason: response.finish_reason,
            }],
            usage: response.usage,
        }
    }
}

/// `<prefix>-` followed by 29 hex characters.
fn response_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..29])
}
