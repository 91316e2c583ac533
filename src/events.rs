//! Pipeline progress announcements.
//!
//! [`PptEngine`](crate::engine::PptEngine) publishes every board change here.
//! The CLI prints them; anything else interested in a run (a future push
//! channel, tests) subscribes the same way. Boards are snapshots, so a
//! listener can keep them without locking anything.

use tokio::sync::broadcast;

use crate::project::ProjectStatus;
use crate::tracker::Board;

#[derive(Debug, Clone)]
pub enum Event {
    /// A run started and its board exists.
    BoardCreated { board: Board },
    /// A stage moved (progress, status or result).
    StageAdvanced { stage_id: String, board: Board },
    /// A stage failed; the run is over.
    StageFailed {
        stage_id: String,
        reason: String,
        board: Board,
    },
    ProjectStatusChanged {
        project_id: String,
        status: ProjectStatus,
    },
}

impl Event {
    /// The project the event belongs to. Boards use the project id as
    /// their task id.
    pub fn project_id(&self) -> &str {
        match self {
            Event::BoardCreated { board }
            | Event::StageAdvanced { board, .. }
            | Event::StageFailed { board, .. } => board.task_id(),
            Event::ProjectStatusChanged { project_id, .. } => project_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::BoardCreated { .. } => "board_created",
            Event::StageAdvanced { .. } => "stage_advanced",
            Event::StageFailed { .. } => "stage_failed",
            Event::ProjectStatusChanged { .. } => "project_status_changed",
        }
    }
}

/// Fan-out of pipeline events. Slow listeners lag and lose the oldest
/// events instead of blocking the pipeline.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    /// Publish to whoever is listening right now and return how many that
    /// was. Nobody listening is normal (the server runs without listeners).
    pub fn emit(&self, event: Event) -> usize {
        log::debug!("{} for project {}", event.kind(), event.project_id());
        self.tx.send(event).unwrap_or(0)
    }

    /// Events from now on. Nothing is replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
