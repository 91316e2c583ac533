pub mod sqlite;

pub use sqlite::SqliteRepository;

use anyhow::Result;
use async_trait::async_trait;

use crate::project::Project;
use crate::tracker::Board;

/// Where projects live. Injected into the engine and the HTTP layer.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<Option<Project>>;
    /// Insert or replace.
    async fn put(&self, project: &Project) -> Result<()>;
    /// Most recently updated first.
    async fn list(&self) -> Result<Vec<Project>>;
    /// `true` if something was deleted.
    async fn delete(&self, project_id: &str) -> Result<bool>;
}

/// Where progress boards live, keyed by task id.
#[async_trait]
pub trait BoardRepository: Send + Sync {
    async fn get(&self, task_id: &str) -> Result<Option<Board>>;
    async fn put(&self, board: &Board) -> Result<()>;
    async fn list(&self) -> Result<Vec<Board>>;
    async fn delete(&self, task_id: &str) -> Result<bool>;
}
