pub mod ppt;

pub use ppt::PptEngine;

use async_trait::async_trait;
use thiserror::Error;

use crate::project::{Project, ProjectError};
use crate::tracker::TrackerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("generation already running for project {0}")]
    AlreadyRunning(String),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("stage {stage_id} failed: {reason}")]
    StageFailed { stage_id: String, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The outermost boundary. main.rs and the server only know this trait.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run the whole pipeline for a stored project and return the result.
    async fn generate(&self, project_id: &str) -> Result<Project, EngineError>;
}
