//! Deck projects and their lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::consts::unix_timestamp;
use crate::schema::PptGenerationRequest;
use crate::tracker::Board;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectError {
    #[error("project {project_id} cannot move from {from} to {to}")]
    InvalidTransition {
        project_id: String,
        from: ProjectStatus,
        to: ProjectStatus,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }

    /// Whether `self -> to` is a legal move. Staying put is always legal.
    pub fn can_transition_to(&self, to: ProjectStatus) -> bool {
        use ProjectStatus::*;
        *self == to
            || matches!(
                (self, to),
                (Draft, InProgress)
                    | (InProgress, Completed)
                    | (Completed, InProgress)
                    | (Draft | InProgress | Completed, Archived)
            )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frozen copy of the generated artefacts at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectVersion {
    pub version: u32,
    pub timestamp: f64,
    pub description: String,
    pub data: Map<String, Value>,
}

pub const TEMPLATE_ID_KEY: &str = "selected_global_template_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub title: String,
    pub scenario: String,
    pub topic: String,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    status: ProjectStatus,
    #[serde(default)]
    outline: Option<Map<String, Value>>,
    #[serde(default)]
    slides_html: Option<String>,
    #[serde(default)]
    slides_data: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    confirmed_requirements: Option<Map<String, Value>>,
    #[serde(default)]
    project_metadata: Option<Map<String, Value>>,
    #[serde(default)]
    todo_board: Option<Board>,
    #[serde(default = "first_version")]
    version: u32,
    #[serde(default)]
    versions: Vec<ProjectVersion>,
    created_at: f64,
    updated_at: f64,
}

fn first_version() -> u32 {
    1
}

impl Project {
    pub fn new(
        title: impl Into<String>,
        scenario: impl Into<String>,
        topic: impl Into<String>,
        requirements: Option<String>,
    ) -> Self {
        let now = unix_timestamp();
        Self {
            project_id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            scenario: scenario.into(),
            topic: topic.into(),
            requirements,
            status: ProjectStatus::Draft,
            outline: None,
            slides_html: None,
            slides_data: None,
            confirmed_requirements: None,
            project_metadata: None,
            todo_board: None,
            version: first_version(),
            versions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A draft project for a generation request. The topic doubles as title.
    pub fn from_request(request: &PptGenerationRequest) -> Self {
        let mut project = Self::new(
            request.topic.clone(),
            request.scenario.clone(),
            request.topic.clone(),
            request.requirements.clone(),
        );
        project.set_metadata("language", request.language.clone());
        project.set_metadata("ppt_style", request.ppt_style.clone());
        project.set_metadata("network_mode", request.network_mode);
        project.set_metadata("content_analysis_depth", request.content_analysis_depth.clone());
        if let Some(audience) = &request.target_audience {
            project.set_metadata("target_audience", audience.clone());
        }
        if let Some(prompt) = &request.custom_style_prompt {
            project.set_metadata("custom_style_prompt", prompt.clone());
        }
        if let Some(description) = &request.description {
            project.set_metadata("description", description.clone());
        }
        if request.use_file_content
            && let Some(content) = &request.uploaded_content
        {
            project.set_metadata("uploaded_content", content.clone());
            project.set_metadata("file_processing_mode", request.file_processing_mode.clone());
        }
        project
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn versions(&self) -> &[ProjectVersion] {
        &self.versions
    }

    pub fn outline(&self) -> Option<&Map<String, Value>> {
        self.outline.as_ref()
    }

    pub fn slides_html(&self) -> Option<&str> {
        self.slides_html.as_deref()
    }

    pub fn slides_data(&self) -> Option<&[Map<String, Value>]> {
        self.slides_data.as_deref()
    }

    pub fn confirmed_requirements(&self) -> Option<&Map<String, Value>> {
        self.confirmed_requirements.as_ref()
    }

    pub fn todo_board(&self) -> Option<&Board> {
        self.todo_board.as_ref()
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn updated_at(&self) -> f64 {
        self.updated_at
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.project_metadata.as_ref()?.get(key)
    }

    /// Content language, falling back to the crate default.
    pub fn language(&self) -> &str {
        self.metadata("language")
            .and_then(Value::as_str)
            .unwrap_or(crate::consts::DEFAULT_LANGUAGE)
    }

    pub fn selected_template_id(&self) -> Option<i64> {
        self.metadata(TEMPLATE_ID_KEY).and_then(Value::as_i64)
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.project_metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self.touch();
    }

    /// `None` clears the selection so the default template applies.
    pub fn select_template(&mut self, template_id: Option<i64>) {
        match template_id {
            Some(id) => self.set_metadata(TEMPLATE_ID_KEY, id),
            None => {
                if let Some(meta) = self.project_metadata.as_mut() {
                    meta.remove(TEMPLATE_ID_KEY);
                }
                self.touch();
            }
        }
    }

    pub fn transition(&mut self, to: ProjectStatus) -> Result<(), ProjectError> {
        if !self.status.can_transition_to(to) {
            return Err(ProjectError::InvalidTransition {
                project_id: self.project_id.clone(),
                from: self.status,
                to,
            });
        }
        if self.status != to {
            self.status = to;
            self.touch();
        }
        Ok(())
    }

    /// Snapshot the current artefacts into the history and bump the version.
    pub fn record_version(&mut self, description: impl Into<String>) {
        let mut data = Map::new();
        data.insert("outline".to_string(), to_value(&self.outline));
        data.insert("slides_html".to_string(), to_value(&self.slides_html));
        data.insert("slides_data".to_string(), to_value(&self.slides_data));
        data.insert(
            "confirmed_requirements".to_string(),
            to_value(&self.confirmed_requirements),
        );

        self.versions.push(ProjectVersion {
            version: self.version,
            timestamp: unix_timestamp(),
            description: description.into(),
            data,
        });
        self.version += 1;
        self.touch();
    }

    /// Accept an outline. The previous state is versioned first.
    pub fn confirm_outline(&mut self, outline: Map<String, Value>) {
        self.record_version("Outline confirmed");

        let mut confirmed = Map::new();
        confirmed.insert("topic".to_string(), Value::from(self.topic.clone()));
        confirmed.insert("scenario".to_string(), Value::from(self.scenario.clone()));
        confirmed.insert(
            "requirements".to_string(),
            to_value(&self.requirements),
        );
        if let Some(title) = outline.get("title") {
            confirmed.insert("title".to_string(), title.clone());
        }
        confirmed.insert(
            "slide_count".to_string(),
            Value::from(
                outline
                    .get("slides")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len),
            ),
        );

        self.outline = Some(outline);
        self.confirmed_requirements = Some(confirmed);
        self.touch();
    }

    pub fn set_slides(&mut self, html: String, data: Vec<Map<String, Value>>) {
        self.slides_html = Some(html);
        self.slides_data = Some(data);
        self.touch();
    }

    /// Embed the latest board snapshot.
    pub fn attach_board(&mut self, board: Board) {
        self.todo_board = Some(board);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = unix_timestamp().max(self.updated_at);
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::default_ppt_stages;
    use serde_json::json;

    fn project() -> Project {
        Project::new("Deck", "general", "Rust adoption", None)
    }

    fn outline(title: &str, slides: usize) -> Map<String, Value> {
        let slides: Vec<Value> = (0..slides)
            .map(|i| json!({"type": "content", "title": format!("S{i}")}))
            .collect();
        match json!({"title": title, "slides": slides}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn new_project_is_draft_v1() {
        let p = project();
        assert_eq!(p.status(), ProjectStatus::Draft);
        assert_eq!(p.version(), 1);
        assert!(p.versions().is_empty());
        assert_eq!(p.project_id.len(), 36);
        assert_ne!(p.project_id, project().project_id);
    }

    #[test]
    fn allowed_transitions() {
        let mut p = project();
        p.transition(ProjectStatus::InProgress).unwrap();
        p.transition(ProjectStatus::Completed).unwrap();
        p.transition(ProjectStatus::InProgress).unwrap();
        p.transition(ProjectStatus::InProgress).unwrap();
        p.transition(ProjectStatus::Archived).unwrap();
        assert_eq!(p.status(), ProjectStatus::Archived);
    }

    #[test]
    fn rejected_transitions() {
        let mut p = project();
        let err = p.transition(ProjectStatus::Completed).unwrap_err();
        assert_eq!(
            err,
            ProjectError::InvalidTransition {
                project_id: p.project_id.clone(),
                from: ProjectStatus::Draft,
                to: ProjectStatus::Completed,
            }
        );
        assert!(err.to_string().contains("from draft to completed"));

        p.transition(ProjectStatus::Archived).unwrap();
        assert!(p.transition(ProjectStatus::InProgress).is_err());
        assert!(p.transition(ProjectStatus::Draft).is_err());
        assert!(p.transition(ProjectStatus::Archived).is_ok());
    }

    #[test]
    fn confirm_outline_versions_previous_state() {
        let mut p = project();
        p.confirm_outline(outline("First", 2));
        assert_eq!(p.version(), 2);
        assert_eq!(p.versions().len(), 1);
        assert_eq!(p.versions()[0].version, 1);
        assert_eq!(p.versions()[0].data["outline"], Value::Null);

        p.confirm_outline(outline("Second", 3));
        assert_eq!(p.version(), 3);
        assert_eq!(p.versions()[1].data["outline"]["title"], "First");
        assert_eq!(p.outline().unwrap()["title"], "Second");

        let confirmed = p.confirmed_requirements().unwrap();
        assert_eq!(confirmed["slide_count"], 3);
        assert_eq!(confirmed["topic"], "Rust adoption");
    }

    #[test]
    fn from_request_fills_metadata() {
        let mut request = PptGenerationRequest::new("technology", "Edge AI");
        request.language = "en".to_string();
        request.target_audience = Some("engineers".to_string());
        request.uploaded_content = Some("notes".to_string());

        let p = Project::from_request(&request);
        assert_eq!(p.title, "Edge AI");
        assert_eq!(p.scenario, "technology");
        assert_eq!(p.language(), "en");
        assert_eq!(p.metadata("target_audience").unwrap(), "engineers");
        assert_eq!(p.metadata("ppt_style").unwrap(), "general");
        // Uploaded content only counts when the request opts in.
        assert!(p.metadata("uploaded_content").is_none());

        request.use_file_content = true;
        let p = Project::from_request(&request);
        assert_eq!(p.metadata("uploaded_content").unwrap(), "notes");
    }

    #[test]
    fn template_selection() {
        let mut p = project();
        assert_eq!(p.selected_template_id(), None);
        p.select_template(Some(4));
        assert_eq!(p.selected_template_id(), Some(4));
        p.select_template(None);
        assert_eq!(p.selected_template_id(), None);
    }

    #[test]
    fn language_defaults_to_zh() {
        assert_eq!(project().language(), "zh");
    }

    #[test]
    fn wire_names() {
        let mut p = project();
        p.transition(ProjectStatus::InProgress).unwrap();
        let board = Board::create(&p.project_id, "Deck", default_ppt_stages("en")).unwrap();
        p.attach_board(board);

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["version"], 1);
        assert_eq!(json["todo_board"]["stages"][0]["id"], "outline");
        assert!(json["created_at"].is_f64());

        let back: Project = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
