use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consts::DEFAULT_OPENAI_MODEL;
use crate::credentials::CredentialStore;

use super::{
    AiMessage, AiProvider, AiResponse, CompletionOptions, ModelInfo, ProviderKind, Usage,
    estimate_usage,
};

/// Any endpoint that speaks the OpenAI `/chat/completions` dialect.
pub struct OpenAiProvider {
    model: String,
    base_url: String,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(model: Option<String>, base_url: String, credentials: Arc<CredentialStore>) -> Self {
        Self {
            model: model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [AiMessage],
        options: &'a CompletionOptions,
        stream: bool,
    ) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            stop: &options.stop,
            stream,
        }
    }

    /// Local endpoints often run without a key, so a missing one is not fatal.
    async fn send(&self, body: &ApiRequest<'_>) -> Result<reqwest::Response> {
        let kind = ProviderKind::OpenAi;
        let api_key = self.credentials.get_api_key(kind.as_str(), kind.env_var())?;

        let mut request = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("OpenAI API error ({}): {}", status, text);
        }
        Ok(resp)
    }

    fn into_response(&self, messages: &[AiMessage], api_resp: ApiResponse) -> Result<AiResponse> {
        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("OpenAI API returned no choices"))?;
        let content = choice.message.content.unwrap_or_default();

        let usage = match api_resp.usage {
            Some(u) => Usage::new(u.prompt_tokens, u.completion_tokens),
            None => {
                let prompt: Vec<String> = messages.iter().map(|m| m.content.to_text()).collect();
                estimate_usage(&prompt.join("\n"), &content)
            }
        };

        let mut metadata = Map::new();
        if let Some(id) = api_resp.id {
            metadata.insert("id".to_string(), Value::String(id));
        }

        Ok(AiResponse {
            content,
            model: api_resp.model.unwrap_or_else(|| self.model.clone()),
            usage,
            finish_reason: choice.finish_reason,
            metadata,
        })
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        ProviderKind::OpenAi.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        messages: &[AiMessage],
        options: &CompletionOptions,
    ) -> Result<AiResponse> {
        let body = self.build_request(messages, options, false);
        let resp = self.send(&body).await?;
        let api_resp: ApiResponse = resp.json().await?;
        let response = self.into_response(messages, api_resp)?;
        log::debug!(
            "openai usage: prompt {}, completion {}",
            response.usage.prompt_tokens,
            response.usage.completion_tokens
        );
        Ok(response)
    }

    async fn stream_chat_completion(
        &self,
        messages: &[AiMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let body = self.build_request(messages, options, true);
        let resp = self.send(&body).await?;

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(anyhow::Error::from))
            .boxed();
        Ok(sse_deltas(bytes))
    }

    fn model_info(&self) -> ModelInfo {
        let mut config = Map::new();
        config.insert("base_url".to_string(), Value::from(self.base_url.clone()));
        ModelInfo {
            model: self.model.clone(),
            provider: self.name().to_string(),
            config,
        }
    }
}

/// Turns a raw SSE byte stream into content deltas. Lines may span chunks.
/// The stream ends at `data: [DONE]`, at the end of the body, or after the
/// first transport error.
fn sse_deltas(bytes: BoxStream<'static, Result<Vec<u8>>>) -> BoxStream<'static, Result<String>> {
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }
            // Drain complete lines already buffered.
            while let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(&line) {
                    SseLine::Delta(text) => return Some((Ok(text), state)),
                    SseLine::Done => return None,
                    SseLine::Skip => {}
                }
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>>>,
    buffer: Vec<u8>,
    done: bool,
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// One `data: {...}` line of a streamed chat completion.
fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
        return SseLine::Skip;
    };
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
    {
        Some(text) if !text.is_empty() => SseLine::Delta(text),
        _ => SseLine::Skip,
    }
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [AiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Deserialize)]
struct ApiResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        let creds = Arc::new(CredentialStore::open(":memory:").unwrap());
        OpenAiProvider::new(None, "http://localhost:8080/v1/".to_string(), creds)
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(
            provider().endpoint(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn request_passes_messages_through() {
        let provider = provider();
        let messages = vec![AiMessage::system("be brief"), AiMessage::user("hi")];
        let options = CompletionOptions {
            temperature: Some(0.5),
            stop: vec!["END".to_string()],
            ..CompletionOptions::default()
        };
        let json = serde_json::to_value(provider.build_request(&messages, &options, false)).unwrap();
        assert_eq!(json["model"], DEFAULT_OPENAI_MODEL);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["stop"][0], "END");
        assert!(json.get("stream").is_none());
        assert!(json.get("max_tokens").is_none());

        let streaming = serde_json::to_value(provider.build_request(
            &messages,
            &CompletionOptions::default(),
            true,
        ))
        .unwrap();
        assert_eq!(streaming["stream"], true);
        assert!(streaming.get("stop").is_none());
    }

    #[test]
    fn response_uses_reported_usage() {
        let api_resp: ApiResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-test",
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        }))
        .unwrap();
        let response = provider()
            .into_response(&[AiMessage::user("hi")], api_resp)
            .unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.model, "gpt-test");
        assert_eq!(response.usage, Usage::new(5, 1));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.metadata["id"], "chatcmpl-1");
    }

    #[test]
    fn missing_usage_is_estimated() {
        let api_resp: ApiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "three word answer"}, "finish_reason": null}]
        }))
        .unwrap();
        let response = provider()
            .into_response(&[AiMessage::user("two words")], api_resp)
            .unwrap();
        assert_eq!(response.usage, Usage::new(2, 3));
        assert_eq!(response.model, DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn no_choices_is_an_error() {
        let api_resp: ApiResponse =
            serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        assert!(provider().into_response(&[], api_resp).is_err());
    }

    #[test]
    fn sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            SseLine::Delta("Hel".to_string())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line("data: not json"), SseLine::Skip);
    }

    fn body(chunks: &[&str]) -> BoxStream<'static, Result<Vec<u8>>> {
        let chunks: Vec<Result<Vec<u8>>> = chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        futures::stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn deltas_stop_at_done() {
        let stream = sse_deltas(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ]));
        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn deltas_end_after_a_transport_error() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err(anyhow::anyhow!("connection reset")),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n".to_vec()),
        ];
        let results: Vec<Result<String>> = sse_deltas(futures::stream::iter(chunks).boxed()).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "a");
        assert!(results[1].is_err());
    }

    #[test]
    fn model_info_exposes_base_url_only() {
        let info = provider().model_info();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.config["base_url"], "http://localhost:8080/v1");
        assert_eq!(info.config.len(), 1);
    }
}
