use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Engine, EngineError};
use crate::events::{Event, EventBus};
use crate::project::{Project, ProjectStatus};
use crate::prompts::extract_json;
use crate::prompts::ppt::{outline_messages, slide_messages};
use crate::provider::{AiProvider, CompletionOptions, Usage};
use crate::repository::{BoardRepository, ProjectRepository};
use crate::schema::{EnhancedPptOutline, SlideContent};
use crate::slides::SlideRenderer;
use crate::tracker::{
    Board, CONTENT_STAGE, OUTLINE_STAGE, RENDERING_STAGE, SharedBoard, StageResult, StageStatus,
    default_ppt_stages,
};

type ActiveRuns = Arc<Mutex<HashMap<String, SharedBoard>>>;

/// Drives outline, content and rendering for one project at a time per id.
pub struct PptEngine {
    provider: Arc<dyn AiProvider>,
    projects: Arc<dyn ProjectRepository>,
    boards: Arc<dyn BoardRepository>,
    events: Arc<EventBus>,
    renderer: SlideRenderer,
    options: CompletionOptions,
    active: ActiveRuns,
}

/// Releases the project's run slot when the run ends, however it ends.
#[derive(Debug)]
struct RunGuard {
    active: ActiveRuns,
    project_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.project_id);
    }
}

/// A claimed run slot for one project, handed from [`PptEngine::claim`] to
/// [`PptEngine::run`]. Dropping it without running frees the slot.
#[derive(Debug)]
pub struct RunTicket {
    project: Project,
    board: SharedBoard,
    _guard: RunGuard,
}

impl RunTicket {
    /// The project as loaded when the slot was claimed.
    pub fn project(&self) -> &Project {
        &self.project
    }
}

/// What a model returns for one slide. Every field is optional; missing
/// ones keep the outline's value.
#[derive(Debug, Default, Deserialize)]
struct SlideDraft {
    title: Option<String>,
    subtitle: Option<String>,
    content: Option<String>,
    bullet_points: Option<Vec<String>>,
    image_suggestions: Option<Vec<String>>,
}

impl PptEngine {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        projects: Arc<dyn ProjectRepository>,
        boards: Arc<dyn BoardRepository>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            projects,
            boards,
            events,
            renderer: SlideRenderer::new()?,
            options: CompletionOptions {
                temperature: Some(0.7),
                ..CompletionOptions::default()
            },
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn provider(&self) -> &Arc<dyn AiProvider> {
        &self.provider
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.active_runs().contains_key(project_id)
    }

    /// The in-flight board, if a run for this project is active.
    pub fn live_board(&self, project_id: &str) -> Option<Board> {
        self.active_runs().get(project_id).map(SharedBoard::snapshot)
    }

    fn active_runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedBoard>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the project and take its run slot, or refuse if a run is
    /// already going. Nothing else about the project changes yet.
    pub async fn claim(&self, project_id: &str) -> Result<RunTicket, EngineError> {
        let project = self
            .projects
            .get(project_id)
            .await?
            .ok_or_else(|| EngineError::ProjectNotFound(project_id.to_string()))?;

        let mut active = self.active_runs();
        if active.contains_key(&project.project_id) {
            return Err(EngineError::AlreadyRunning(project.project_id.clone()));
        }
        let board = SharedBoard::new(Board::create(
            project.project_id.clone(),
            project.title.clone(),
            default_ppt_stages(project.language()),
        )?);
        active.insert(project.project_id.clone(), board.clone());
        drop(active);

        Ok(RunTicket {
            _guard: RunGuard {
                active: self.active.clone(),
                project_id: project.project_id.clone(),
            },
            project,
            board,
        })
    }

    /// Move a stage, then persist and announce the new board.
    async fn advance(
        &self,
        project: &mut Project,
        shared: &SharedBoard,
        stage_id: &str,
        status: StageStatus,
        progress: f64,
        result: Option<StageResult>,
    ) -> Result<()> {
        let board = shared.advance_stage(stage_id, status, progress, result)?;
        self.persist(project, &board).await?;
        self.events.emit(Event::StageAdvanced {
            stage_id: stage_id.to_string(),
            board,
        });
        Ok(())
    }

    async fn persist(&self, project: &mut Project, board: &Board) -> Result<()> {
        project.attach_board(board.clone());
        self.boards.put(board).await?;
        self.projects.put(project).await?;
        Ok(())
    }

    fn set_status(&self, project: &mut Project, status: ProjectStatus) -> Result<(), EngineError> {
        let changed = project.status() != status;
        project.transition(status)?;
        if changed {
            self.events.emit(Event::ProjectStatusChanged {
                project_id: project.project_id.clone(),
                status,
            });
        }
        Ok(())
    }

    /// Record the failure on the board. The run ends here.
    async fn fail(
        &self,
        project: &mut Project,
        shared: &SharedBoard,
        stage_id: &str,
        error: anyhow::Error,
    ) -> EngineError {
        let reason = format!("{error:#}");
        log::error!(
            "project {}: stage {} failed: {}",
            project.project_id,
            stage_id,
            reason
        );

        match shared.mark_failed(stage_id, &reason) {
            Ok(board) => {
                if let Err(e) = self.persist(project, &board).await {
                    log::warn!(
                        "project {}: could not persist failed board: {e:#}",
                        project.project_id
                    );
                }
                self.events.emit(Event::StageFailed {
                    stage_id: stage_id.to_string(),
                    reason: reason.clone(),
                    board,
                });
            }
            Err(e) => log::warn!("project {}: {e}", project.project_id),
        }

        EngineError::StageFailed {
            stage_id: stage_id.to_string(),
            reason,
        }
    }

    async fn outline_stage(
        &self,
        project: &mut Project,
        shared: &SharedBoard,
        usage: &mut Usage,
    ) -> Result<EnhancedPptOutline> {
        self.advance(project, shared, OUTLINE_STAGE, StageStatus::Running, 0.1, None)
            .await?;

        let response = self
            .provider
            .chat_completion(&outline_messages(project), &self.options)
            .await
            .context("outline request failed")?;
        usage.add(response.usage);

        let outline: EnhancedPptOutline = serde_json::from_str(extract_json(&response.content))
            .context("outline is not valid JSON")?;
        if outline.slides.is_empty() {
            bail!("outline has no slides");
        }

        let Value::Object(map) = serde_json::to_value(&outline)? else {
            bail!("outline did not serialize to an object");
        };
        project.confirm_outline(map);

        let result = stage_result(json!({
            "title": outline.title,
            "slide_count": outline.slides.len(),
            "tokens": response.usage.total_tokens,
        }));
        self.advance(
            project,
            shared,
            OUTLINE_STAGE,
            StageStatus::Completed,
            1.0,
            Some(result),
        )
        .await?;
        Ok(outline)
    }

    async fn content_stage(
        &self,
        project: &mut Project,
        shared: &SharedBoard,
        outline: &EnhancedPptOutline,
        usage: &mut Usage,
    ) -> Result<Vec<SlideContent>> {
        self.advance(project, shared, CONTENT_STAGE, StageStatus::Running, 0.0, None)
            .await?;

        let total = outline.slides.len();
        let mut slides = Vec::with_capacity(total);
        let mut tokens = 0;

        for (index, planned) in outline.slides.iter().enumerate() {
            let slide = if planned.locked {
                planned.clone()
            } else {
                let messages = slide_messages(project, &outline.title, planned, index, total);
                let response = self
                    .provider
                    .chat_completion(&messages, &self.options)
                    .await
                    .with_context(|| format!("content request for slide {} failed", index + 1))?;
                usage.add(response.usage);
                tokens += response.usage.total_tokens;
                merge_draft(planned, &response.content)
            };
            slides.push(slide);

            self.advance(
                project,
                shared,
                CONTENT_STAGE,
                StageStatus::Running,
                (index + 1) as f64 / total as f64,
                None,
            )
            .await?;
        }

        let result = stage_result(json!({ "slides": total, "tokens": tokens }));
        self.advance(
            project,
            shared,
            CONTENT_STAGE,
            StageStatus::Completed,
            1.0,
            Some(result),
        )
        .await?;
        Ok(slides)
    }

    async fn rendering_stage(
        &self,
        project: &mut Project,
        shared: &SharedBoard,
        title: &str,
        slides: &[SlideContent],
    ) -> Result<()> {
        self.advance(project, shared, RENDERING_STAGE, StageStatus::Running, 0.0, None)
            .await?;

        let (html, data) =
            self.renderer
                .render_deck(title, slides, project.language(), &project.scenario)?;
        let bytes = html.len();
        project.set_slides(html, data);

        let result = stage_result(json!({ "html_bytes": bytes }));
        self.advance(
            project,
            shared,
            RENDERING_STAGE,
            StageStatus::Completed,
            1.0,
            Some(result),
        )
        .await
    }
}

impl PptEngine {
    /// Run the whole pipeline on a claimed slot. The slot is released when
    /// this returns.
    pub async fn run(&self, ticket: RunTicket) -> Result<Project, EngineError> {
        let RunTicket {
            mut project,
            board: shared,
            _guard,
        } = ticket;
        log::info!(
            "project {}: generating with {} ({})",
            project.project_id,
            self.provider.name(),
            self.provider.model()
        );

        self.set_status(&mut project, ProjectStatus::InProgress)?;
        let board = shared.snapshot();
        self.persist(&mut project, &board).await?;
        self.events.emit(Event::BoardCreated { board });

        let mut usage = Usage::default();

        let outline = match self.outline_stage(&mut project, &shared, &mut usage).await {
            Ok(outline) => outline,
            Err(e) => return Err(self.fail(&mut project, &shared, OUTLINE_STAGE, e).await),
        };

        let slides = match self
            .content_stage(&mut project, &shared, &outline, &mut usage)
            .await
        {
            Ok(slides) => slides,
            Err(e) => return Err(self.fail(&mut project, &shared, CONTENT_STAGE, e).await),
        };

        if let Err(e) = self
            .rendering_stage(&mut project, &shared, &outline.title, &slides)
            .await
        {
            return Err(self.fail(&mut project, &shared, RENDERING_STAGE, e).await);
        }

        project.set_metadata("last_usage", serde_json::to_value(usage).unwrap_or_default());
        self.set_status(&mut project, ProjectStatus::Completed)?;
        project.record_version("Slides generated");
        let board = shared.snapshot();
        self.persist(&mut project, &board).await?;

        log::info!(
            "project {}: done, {} slides, {} tokens",
            project.project_id,
            slides.len(),
            usage.total_tokens
        );
        Ok(project)
    }
}

#[async_trait]
impl Engine for PptEngine {
    async fn generate(&self, project_id: &str) -> Result<Project, EngineError> {
        let ticket = self.claim(project_id).await?;
        self.run(ticket).await
    }
}

fn stage_result(value: Value) -> StageResult {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Lay the model's slide over the planned one. A reply that isn't JSON
/// becomes the slide body.
fn merge_draft(planned: &SlideContent, reply: &str) -> SlideContent {
    let draft = match serde_json::from_str::<SlideDraft>(extract_json(reply)) {
        Ok(draft) => draft,
        Err(e) => {
            log::warn!("slide \"{}\": reply is not JSON ({e}), using text", planned.title);
            SlideDraft {
                content: Some(reply.trim().to_string()),
                ..SlideDraft::default()
            }
        }
    };

    let mut slide = planned.clone();
    if let Some(title) = draft.title.filter(|t| !t.trim().is_empty()) {
        slide.title = title;
    }
    if draft.subtitle.is_some() {
        slide.subtitle = draft.subtitle;
    }
    if draft.content.is_some() {
        slide.content = draft.content;
    }
    if draft.bullet_points.is_some() {
        slide.bullet_points = draft.bullet_points;
    }
    if draft.image_suggestions.is_some() {
        slide.image_suggestions = draft.image_suggestions;
    }
    slide
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SlideType;

    #[test]
    fn merge_keeps_type_and_layout() {
        let mut planned = SlideContent::new(SlideType::Agenda, "Agenda");
        planned.layout = "two-column".to_string();
        let slide = merge_draft(
            &planned,
            r#"{"title": "Today", "bullet_points": ["a", "b"], "type": "chart"}"#,
        );
        assert_eq!(slide.slide_type, SlideType::Agenda);
        assert_eq!(slide.layout, "two-column");
        assert_eq!(slide.title, "Today");
        assert_eq!(slide.bullet_points.unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn merge_ignores_blank_title() {
        let planned = SlideContent::new(SlideType::Content, "Keep me");
        let slide = merge_draft(&planned, r#"{"title": "  ", "content": "body"}"#);
        assert_eq!(slide.title, "Keep me");
        assert_eq!(slide.content.as_deref(), Some("body"));
    }

    #[test]
    fn merge_falls_back_to_text() {
        let planned = SlideContent::new(SlideType::Content, "Plain");
        let slide = merge_draft(&planned, "  Just some prose.  ");
        assert_eq!(slide.title, "Plain");
        assert_eq!(slide.content.as_deref(), Some("Just some prose."));
    }

    #[test]
    fn stage_result_from_non_object_is_empty() {
        assert!(stage_result(json!([1, 2])).is_empty());
        assert_eq!(stage_result(json!({"a": 1}))["a"], 1);
    }
}
