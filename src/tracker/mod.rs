//! Staged progress tracking for multi-step generation jobs.
//!
//! A [`Board`] is an ordered list of [`Stage`]s belonging to one task. The
//! pipeline driver is the only writer and goes through
//! [`Board::advance_stage`] and [`Board::mark_failed`]; pollers read a
//! [`Board::snapshot`]. Fields are private so a snapshot can't be edited
//! into an inconsistent state.

mod shared;

pub use shared::SharedBoard;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::consts::unix_timestamp;

pub const OUTLINE_STAGE: &str = "outline";
pub const CONTENT_STAGE: &str = "content";
pub const RENDERING_STAGE: &str = "rendering";

/// Opaque, provider-defined payload attached to a stage.
pub type StageResult = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    #[error("invalid pipeline definition: {0}")]
    InvalidPipelineDefinition(String),

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("stage {stage_id} is already {status}")]
    StageTerminal { stage_id: String, status: StageStatus },

    #[error("invalid progress for stage {stage_id}: {value}")]
    InvalidProgress { stage_id: String, value: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    /// Completed and failed stages never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pipeline declares up front for each stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub subtasks: Vec<String>,
}

impl StageDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            subtasks: Vec::new(),
        }
    }

    pub fn with_subtasks(mut self, subtasks: &[&str]) -> Self {
        self.subtasks = subtasks.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// One named unit of work within a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    id: String,
    name: String,
    description: String,
    #[serde(default)]
    status: StageStatus,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    subtasks: Vec<String>,
    #[serde(default)]
    result: Option<StageResult>,
    created_at: f64,
    updated_at: f64,
}

impl Stage {
    fn from_definition(def: StageDefinition, now: f64) -> Self {
        Self {
            id: def.id,
            name: def.name,
            description: def.description,
            status: StageStatus::Pending,
            progress: 0.0,
            subtasks: def.subtasks,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn subtasks(&self) -> &[String] {
        &self.subtasks
    }

    pub fn result(&self) -> Option<&StageResult> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn updated_at(&self) -> f64 {
        self.updated_at
    }
}

/// Ordered stages of one generation task plus aggregate progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoardRecord")]
pub struct Board {
    task_id: String,
    title: String,
    stages: Vec<Stage>,
    current_stage_index: usize,
    overall_progress: f64,
    created_at: f64,
    updated_at: f64,
}

/// A board as stored, before its invariants are checked.
#[derive(Deserialize)]
struct BoardRecord {
    task_id: String,
    title: String,
    stages: Vec<Stage>,
    #[serde(default)]
    current_stage_index: usize,
    #[serde(default)]
    overall_progress: f64,
    created_at: f64,
    updated_at: f64,
}

impl TryFrom<BoardRecord> for Board {
    type Error = TrackerError;

    /// Loaded boards obey the same rules as built ones: valid stage ids,
    /// an index within `0..=len`, and every progress in `[0, 1]`.
    fn try_from(record: BoardRecord) -> Result<Self, TrackerError> {
        check_stage_ids(record.stages.iter().map(|s| s.id.as_str()))?;
        if record.current_stage_index > record.stages.len() {
            return Err(TrackerError::InvalidPipelineDefinition(format!(
                "current stage index {} is past the last stage",
                record.current_stage_index
            )));
        }
        for stage in &record.stages {
            check_progress(&stage.id, stage.progress)?;
        }
        check_progress(&record.task_id, record.overall_progress)?;

        Ok(Self {
            task_id: record.task_id,
            title: record.title,
            stages: record.stages,
            current_stage_index: record.current_stage_index,
            overall_progress: record.overall_progress,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn check_stage_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Result<(), TrackerError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(TrackerError::InvalidPipelineDefinition(
                "stage id must not be empty".to_string(),
            ));
        }
        if !seen.insert(id) {
            return Err(TrackerError::InvalidPipelineDefinition(format!(
                "duplicate stage id: {id}"
            )));
        }
    }
    if seen.is_empty() {
        return Err(TrackerError::InvalidPipelineDefinition(
            "no stages defined".to_string(),
        ));
    }
    Ok(())
}

fn check_progress(id: &str, value: f64) -> Result<(), TrackerError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TrackerError::InvalidProgress {
            stage_id: id.to_string(),
            value,
        })
    }
}

impl Board {
    /// Build a board with every stage pending.
    ///
    /// Fails with [`TrackerError::InvalidPipelineDefinition`] when the list
    /// is empty, a stage id is blank, or two stages share an id.
    pub fn create(
        task_id: impl Into<String>,
        title: impl Into<String>,
        definitions: Vec<StageDefinition>,
    ) -> Result<Self, TrackerError> {
        check_stage_ids(definitions.iter().map(|def| def.id.as_str()))?;

        let now = unix_timestamp();
        let stages = definitions
            .into_iter()
            .map(|def| Stage::from_definition(def, now))
            .collect();

        Ok(Self {
            task_id: task_id.into(),
            title: title.into(),
            stages,
            current_stage_index: 0,
            overall_progress: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a status/progress/result update to one stage.
    ///
    /// `completed` pins the stage progress to 1.0 and, if the stage is the
    /// current one, moves the index to the next stage that is still open.
    /// A `None` result leaves any earlier result in place.
    pub fn advance_stage(
        &mut self,
        stage_id: &str,
        status: StageStatus,
        progress: f64,
        result: Option<StageResult>,
    ) -> Result<(), TrackerError> {
        let index = self.open_stage_index(stage_id)?;
        if !progress.is_finite() {
            return Err(TrackerError::InvalidProgress {
                stage_id: stage_id.to_string(),
                value: progress,
            });
        }

        let progress = if status == StageStatus::Completed {
            1.0
        } else {
            progress.clamp(0.0, 1.0)
        };

        let now = unix_timestamp();
        let stage = &mut self.stages[index];
        stage.status = status;
        stage.progress = progress;
        if result.is_some() {
            stage.result = result;
        }
        stage.updated_at = now;

        if status == StageStatus::Completed && index == self.current_stage_index {
            self.current_stage_index = self.next_open_stage(index + 1);
        }

        self.recompute_progress();
        self.updated_at = now;
        Ok(())
    }

    /// Fail a stage and record why. The current index stays put: a failed
    /// board does not progress until someone outside retries or aborts.
    pub fn mark_failed(
        &mut self,
        stage_id: &str,
        reason: impl Into<String>,
    ) -> Result<(), TrackerError> {
        let index = self.open_stage_index(stage_id)?;

        let now = unix_timestamp();
        let stage = &mut self.stages[index];
        stage.status = StageStatus::Failed;
        stage
            .result
            .get_or_insert_with(Map::new)
            .insert("error".to_string(), Value::String(reason.into()));
        stage.updated_at = now;

        self.recompute_progress();
        self.updated_at = now;
        Ok(())
    }

    /// Detached copy for readers.
    pub fn snapshot(&self) -> Board {
        self.clone()
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn current_stage_index(&self) -> usize {
        self.current_stage_index
    }

    pub fn overall_progress(&self) -> f64 {
        self.overall_progress
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn updated_at(&self) -> f64 {
        self.updated_at
    }

    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// `None` once every stage is done.
    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage_index)
    }

    pub fn is_finished(&self) -> bool {
        self.current_stage_index >= self.stages.len()
    }

    pub fn has_failed(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }

    fn open_stage_index(&self, stage_id: &str) -> Result<usize, TrackerError> {
        let index = self
            .stages
            .iter()
            .position(|s| s.id == stage_id)
            .ok_or_else(|| TrackerError::UnknownStage(stage_id.to_string()))?;

        let status = self.stages[index].status;
        if status.is_terminal() {
            return Err(TrackerError::StageTerminal {
                stage_id: stage_id.to_string(),
                status,
            });
        }
        Ok(index)
    }

    fn next_open_stage(&self, from: usize) -> usize {
        self.stages
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, s)| !s.status.is_terminal())
            .map(|(i, _)| i)
            .unwrap_or(self.stages.len())
    }

    fn recompute_progress(&mut self) {
        if self.stages.is_empty() {
            self.overall_progress = 0.0;
            return;
        }
        let total: f64 = self.stages.iter().map(|s| s.progress).sum();
        self.overall_progress = (total / self.stages.len() as f64).clamp(0.0, 1.0);
    }
}

/// The three stages every deck goes through.
pub fn default_ppt_stages(language: &str) -> Vec<StageDefinition> {
    if language.starts_with("zh") {
        vec![
            StageDefinition::new(OUTLINE_STAGE, "大纲生成", "根据主题和需求生成PPT大纲")
                .with_subtasks(&["分析需求", "生成大纲", "确认大纲"]),
            StageDefinition::new(CONTENT_STAGE, "内容生成", "为每一页幻灯片生成详细内容"),
            StageDefinition::new(RENDERING_STAGE, "幻灯片渲染", "将幻灯片内容渲染为HTML"),
        ]
    } else {
        vec![
            StageDefinition::new(
                OUTLINE_STAGE,
                "Outline generation",
                "Draft the deck outline from the topic and requirements",
            )
            .with_subtasks(&["analyze requirements", "draft outline", "confirm outline"]),
            StageDefinition::new(
                CONTENT_STAGE,
                "Content generation",
                "Write the content of every slide",
            ),
            StageDefinition::new(
                RENDERING_STAGE,
                "Slide rendering",
                "Render slide content to HTML",
            ),
        ]
    }
}
