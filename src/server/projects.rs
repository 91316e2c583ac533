//! Project, progress and report endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;
use crate::project::{Project, ProjectStatus};
use crate::research::SavedReport;
use crate::schema::{
    PptGenerationRequest, PptGenerationResponse, PptScenario, ProjectListResponse,
    TemplateSelectionRequest, builtin_scenarios,
};
use crate::tracker::Board;

pub const MAX_PAGE_SIZE: usize = 100;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn scenarios() -> Json<Vec<PptScenario>> {
    Json(builtin_scenarios())
}

async fn load(state: &AppState, project_id: &str) -> ApiResult<Project> {
    state
        .projects
        .get(project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project not found: {project_id}")))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<PptGenerationRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    if request.topic.trim().is_empty() {
        return Err(ApiError::bad_request("topic must not be empty"));
    }
    let project = Project::from_request(&request);
    state.projects.put(&project).await?;
    log::info!("created project {} ({})", project.project_id, project.topic);
    Ok((StatusCode::CREATED, Json(project)))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn first_page() -> usize {
    1
}

fn default_page_size() -> usize {
    10
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<ProjectListResponse>> {
    if params.page == 0 {
        return Err(ApiError::bad_request("page starts at 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&params.page_size) {
        return Err(ApiError::bad_request(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let all = state.projects.list().await?;
    let total = all.len();
    let projects = all
        .into_iter()
        .skip((params.page - 1) * params.page_size)
        .take(params.page_size)
        .collect();
    Ok(Json(ProjectListResponse {
        projects,
        total,
        page: params.page,
        page_size: params.page_size,
    }))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(load(&state, &project_id).await?))
}

/// Live board while a run is active, otherwise the last persisted one.
pub async fn get_todo(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Board>> {
    if let Some(board) = state.engine.live_board(&project_id) {
        return Ok(Json(board));
    }
    if let Some(board) = state.boards.get(&project_id).await? {
        return Ok(Json(board));
    }
    let project = load(&state, &project_id).await?;
    project
        .todo_board()
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no board yet for project {project_id}")))
}

/// Claims the run slot, then runs the pipeline in the background. Poll
/// `/todo` for progress.
pub async fn generate(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<(StatusCode, Json<PptGenerationResponse>)> {
    let ticket = state.engine.claim(&project_id).await?;
    let status = ticket.project().status();
    if !status.can_transition_to(ProjectStatus::InProgress) {
        return Err(ApiError::conflict(format!(
            "project {project_id} is {status} and cannot be regenerated"
        )));
    }

    let engine = state.engine.clone();
    let id = project_id.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.run(ticket).await {
            log::warn!("generation for project {id} ended with error: {e}");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(PptGenerationResponse {
            task_id: project_id,
            status: ProjectStatus::InProgress.as_str().to_string(),
            outline: None,
            slides_html: None,
            error: None,
        }),
    ))
}

/// Writes outside the pipeline are refused while a run owns the project.
fn ensure_idle(state: &AppState, project_id: &str) -> ApiResult<()> {
    if state.engine.is_running(project_id) {
        return Err(ApiError::conflict(format!(
            "project {project_id} is generating"
        )));
    }
    Ok(())
}

pub async fn archive(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    ensure_idle(&state, &project_id)?;
    let mut project = load(&state, &project_id).await?;
    project.transition(ProjectStatus::Archived)?;
    state.projects.put(&project).await?;
    Ok(Json(project))
}

pub async fn select_template(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<TemplateSelectionRequest>,
) -> ApiResult<Json<Project>> {
    if request.project_id != project_id {
        return Err(ApiError::bad_request("project_id does not match the path"));
    }
    ensure_idle(&state, &project_id)?;
    let mut project = load(&state, &project_id).await?;
    project.select_template(request.selected_template_id);
    if let Some(mode) = request.template_mode {
        project.set_metadata("template_mode", serde_json::to_value(mode).unwrap_or_default());
    }
    state.projects.put(&project).await?;
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<StatusCode> {
    ensure_idle(&state, &project_id)?;
    if !state.projects.delete(&project_id).await? {
        return Err(ApiError::not_found(format!(
            "project not found: {project_id}"
        )));
    }
    state.boards.delete(&project_id).await?;
    log::info!("deleted project {project_id}");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_reports(State(state): State<AppState>) -> Json<Vec<SavedReport>> {
    Json(state.reports.list_saved())
}

pub async fn delete_report(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<StatusCode> {
    if state.reports.delete(&filename) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("report not found: {filename}")))
    }
}
