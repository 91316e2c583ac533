//! Research reports produced by the deep-research process.
//!
//! The research itself happens elsewhere; this crate only reads the
//! finished [`ResearchReport`] and turns it into Markdown files through
//! [`ReportGenerator`].

pub mod report;

pub use report::{ReportError, ReportGenerator, SavedReport, sanitize_filename};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One search hit gathered during a research step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A single query/analysis round. When `completed` is false, `analysis`
/// carries the error message instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStep {
    pub step_number: u32,
    pub query: String,
    #[serde(default)]
    pub description: String,
    pub analysis: String,
    pub completed: bool,
    #[serde(default)]
    pub results: Vec<SourceResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub topic: String,
    pub language: String,
    pub steps: Vec<ResearchStep>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub executive_summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Seconds spent researching.
    pub total_duration: f64,
    pub created_at: DateTime<Local>,
}

impl ResearchReport {
    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }
}
