use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use slidewright::engine::PptEngine;
use slidewright::events::EventBus;
use slidewright::provider::mock::{MockProvider, MockReply};
use slidewright::repository::SqliteRepository;
use slidewright::research::ReportGenerator;
use slidewright::server::{AppState, router};

struct TestApp {
    router: Router,
    _reports: tempfile::TempDir,
}

fn app(replies: Vec<MockReply>) -> TestApp {
    app_with(Arc::new(MockProvider::new(replies)))
}

fn app_with(provider: Arc<MockProvider>) -> TestApp {
    let reports = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteRepository::in_memory().unwrap());
    let engine = PptEngine::new(
        provider,
        repo.clone(),
        repo.clone(),
        Arc::new(EventBus::default()),
    )
    .unwrap();
    let state = AppState {
        projects: repo.clone(),
        boards: repo,
        engine: Arc::new(engine),
        reports: Arc::new(ReportGenerator::new(reports.path())),
    };
    TestApp {
        router: router(state),
        _reports: reports,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

fn deck_replies(topic: &str) -> Vec<MockReply> {
    vec![
        MockReply::text(format!(
            r#"{{"title": "{topic}", "slides": [{{"type": "title", "title": "{topic}"}}]}}"#
        )),
        MockReply::text(r#"{"subtitle": "An overview"}"#),
    ]
}

async fn wait_for_status(app: &TestApp, id: &str, wanted: &str) -> Value {
    for _ in 0..200 {
        let (_, body) = send(app, "GET", &format!("/api/projects/{id}"), None).await;
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("project {id} never reached {wanted}");
}

async fn create(app: &TestApp, topic: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/projects",
        Some(json!({ "scenario": "general", "topic": topic, "language": "en" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["project_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_and_scenarios() {
    let app = app(vec![]);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/api/scenarios", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 7);
    assert_eq!(body[0]["id"], "general");
}

#[tokio::test]
async fn create_get_list_delete() {
    let app = app(vec![]);
    let id = create(&app, "Volcanoes").await;
    create(&app, "Glaciers").await;

    let (status, body) = send(&app, "GET", &format!("/api/projects/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["topic"], "Volcanoes");
    assert_eq!(body["status"], "draft");

    let (status, body) = send(&app, "GET", "/api/projects?page=1&page_size=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["projects"].as_array().unwrap().len(), 1);
    assert_eq!(body["projects"][0]["topic"], "Glaciers");

    let (status, _) = send(&app, "DELETE", &format!("/api/projects/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, "GET", &format!("/api/projects/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains(&id));
}

#[tokio::test]
async fn bad_requests() {
    let app = app(vec![]);

    let (status, _) = send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "scenario": "general", "topic": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/projects?page=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, "GET", "/api/projects?page_size=101", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/projects/missing/generate", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", "/api/projects/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", "/api/research/reports/missing.md", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generate_in_background_then_poll() {
    let app = app(vec![
        MockReply::text(r#"{"title": "Bees", "slides": [{"type": "title", "title": "Bees"}]}"#),
        MockReply::text(r#"{"subtitle": "Tiny pollinators"}"#),
    ]);
    let id = create(&app, "Bees").await;

    let (status, body) = send(&app, "POST", &format!("/api/projects/{id}/generate"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["task_id"], id);
    assert_eq!(body["status"], "in_progress");

    let project = wait_for_status(&app, &id, "completed").await;
    assert!(
        project["slides_html"]
            .as_str()
            .unwrap()
            .contains("Tiny pollinators")
    );

    let (status, board) = send(&app, "GET", &format!("/api/projects/{id}/todo"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["overall_progress"], 1.0);
    assert_eq!(board["current_stage_index"], 3);
}

#[tokio::test]
async fn back_to_back_generate_is_refused() {
    let provider = Arc::new(MockProvider::new(deck_replies("Kelp")).gated());
    let app = app_with(provider.clone());
    let id = create(&app, "Kelp").await;
    let uri = format!("/api/projects/{id}/generate");

    let (first, _) = send(&app, "POST", &uri, None).await;
    let (second, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains(&id));

    provider.release(2);
    wait_for_status(&app, &id, "completed").await;
    assert_eq!(provider.calls(), 2);

    let (again, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(again, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn writes_are_refused_while_generating() {
    let provider = Arc::new(MockProvider::new(deck_replies("Reefs")).gated());
    let app = app_with(provider.clone());
    let id = create(&app, "Reefs").await;
    let template = json!({ "project_id": id, "selected_template_id": 3 });

    let (status, _) = send(&app, "POST", &format!("/api/projects/{id}/generate"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app, "POST", &format!("/api/projects/{id}/template"), Some(template.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("generating"));
    let (status, _) = send(&app, "POST", &format!("/api/projects/{id}/archive"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&app, "DELETE", &format!("/api/projects/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    provider.release(2);
    wait_for_status(&app, &id, "completed").await;

    let (status, body) = send(&app, "POST", &format!("/api/projects/{id}/template"), Some(template)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project_metadata"]["selected_global_template_id"], 3);
    let (_, stored) = send(&app, "GET", &format!("/api/projects/{id}"), None).await;
    assert_eq!(stored["project_metadata"]["selected_global_template_id"], 3);
    assert_eq!(stored["status"], "completed");
}

#[tokio::test]
async fn archive_blocks_generation() {
    let app = app(vec![]);
    let id = create(&app, "Owls").await;

    let (status, body) = send(&app, "POST", &format!("/api/projects/{id}/archive"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "archived");

    let (status, _) = send(&app, "POST", &format!("/api/projects/{id}/generate"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn template_selection() {
    let app = app(vec![]);
    let id = create(&app, "Rivers").await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/projects/{id}/template"),
        Some(json!({ "project_id": id, "selected_template_id": 7, "template_mode": "global" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project_metadata"]["selected_global_template_id"], 7);
    assert_eq!(body["project_metadata"]["template_mode"], "global");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/projects/{id}/template"),
        Some(json!({ "project_id": "someone-else" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn todo_before_any_run_is_not_found() {
    let app = app(vec![]);
    let id = create(&app, "Moss").await;
    let (status, _) = send(&app, "GET", &format!("/api/projects/{id}/todo"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_completions_proxy() {
    let app = app(vec![MockReply::text("Hello there")]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/chat/completions",
        Some(json!({
            "model": "anything",
            "messages": [{ "role": "user", "content": "hi" }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello there");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));

    let (status, body) = send(
        &app,
        "POST",
        "/v1/chat/completions",
        Some(json!({ "model": "anything", "messages": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("messages"));
}

#[tokio::test]
async fn streamed_chat_ends_with_done() {
    let app = app(vec![MockReply::text("streamed")]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/chat/completions",
        Some(json!({
            "model": "anything",
            "messages": [{ "role": "user", "content": "hi" }],
            "stream": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("chat.completion.chunk"));
    assert!(text.contains("streamed"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn models_and_completions() {
    let app = app(vec![MockReply::text("done")]);

    let (status, body) = send(&app, "GET", "/v1/models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], "mock-model");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/completions",
        Some(json!({ "model": "m", "prompt": "say done" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "text_completion");
    assert_eq!(body["choices"][0]["text"], "done");

}

#[tokio::test]
async fn streamed_completion_ends_with_done() {
    let app = app(vec![MockReply::text("once upon a time")]);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/completions",
        Some(json!({ "model": "m", "prompt": "begin a story", "stream": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains(r#""object":"text_completion""#));
    assert!(text.contains("once upon a time"));
    assert!(text.contains(r#""id":"cmpl-"#));
    assert!(!text.contains("chat.completion.chunk"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}
