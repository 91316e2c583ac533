//! OpenAI-compatible endpoints backed by the configured provider.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;
use crate::schema::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, CompletionResponse,
};

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;
    let messages = request.ai_messages();
    let options = request.params.to_options();
    let provider = state.engine.provider().clone();

    if request.params.stream.unwrap_or(false) {
        let chunks = provider.stream_chat_completion(&messages, &options).await?;
        return Ok(sse_response(chunks, "chatcmpl", provider.model(), chat_chunk));
    }

    let response = provider.chat_completion(&messages, &options).await?;
    Ok(Json(ChatCompletionResponse::from_ai(response)).into_response())
}

pub async fn completions(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;
    let prompt = request.prompt.joined();
    let options = request.options();
    let provider = state.engine.provider().clone();

    if request.params.stream.unwrap_or(false) {
        let chunks = provider.stream_text_completion(&prompt, &options).await?;
        return Ok(sse_response(chunks, "cmpl", provider.model(), text_chunk));
    }

    let response = provider.text_completion(&prompt, &options).await?;
    Ok(Json(CompletionResponse::from_ai(response)).into_response())
}

/// Frame each chunk with `frame(id, model, created, text)` and finish
/// with `[DONE]`. An upstream error becomes one `{"error"}` event.
fn sse_response(
    chunks: BoxStream<'static, anyhow::Result<String>>,
    id_prefix: &str,
    model: &str,
    frame: fn(&str, &str, i64, &str) -> Value,
) -> Response {
    let id = format!("{id_prefix}-{}", uuid::Uuid::new_v4().simple());
    let model = model.to_string();
    let created = chrono::Utc::now().timestamp();

    let events = chunks
        .map(move |chunk| {
            let data = match chunk {
                Ok(text) => frame(&id, &model, created, &text),
                Err(e) => {
                    log::warn!("stream interrupted: {e:#}");
                    json!({ "error": format!("{e:#}") })
                }
            };
            Ok::<_, Infallible>(SseEvent::default().data(data.to_string()))
        })
        .chain(stream::once(async {
            Ok::<_, Infallible>(SseEvent::default().data("[DONE]"))
        }));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn chat_chunk(id: &str, model: &str, created: i64, text: &str) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{ "index": 0, "delta": { "content": text }, "finish_reason": null }],
    })
}

fn text_chunk(id: &str, model: &str, created: i64, text: &str) -> Value {
    json!({
        "id": id,
        "object": "text_completion",
        "created": created,
        "model": model,
        "choices": [{ "text": text, "index": 0, "finish_reason": null }],
    })
}

pub async fn models(State(state): State<AppState>) -> Json<Value> {
    let info = state.engine.provider().model_info();
    Json(json!({
        "object": "list",
        "data": [{
            "id": info.model,
            "object": "model",
            "created": 0,
            "owned_by": info.provider,
        }],
    }))
}
