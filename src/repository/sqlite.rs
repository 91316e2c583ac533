use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use std::sync::Mutex;

use super::{BoardRepository, ProjectRepository};
use crate::project::Project;
use crate::tracker::Board;

/// SQLite-backed storage for projects and boards.
///
/// Each row carries the full JSON document; only the columns used for
/// lookup and ordering are broken out.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the tables in the given database path.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open project database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS projects (
                project_id TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                updated_at REAL NOT NULL,
                data       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS boards (
                task_id    TEXT PRIMARY KEY,
                updated_at REAL NOT NULL,
                data       TEXT NOT NULL
            );",
        )
        .context("failed to create project tables")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn get_json<T: DeserializeOwned>(&self, sql: &str, key: &str) -> Result<Option<T>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(sql, [key], |row| row.get(0))
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    fn list_json<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let jsons = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let items = jsons
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn delete_row(&self, sql: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(sql, [key])?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ProjectRepository for SqliteRepository {
    async fn get(&self, project_id: &str) -> Result<Option<Project>> {
        self.get_json("SELECT data FROM projects WHERE project_id = ?1", project_id)
    }

    async fn put(&self, project: &Project) -> Result<()> {
        let json = serde_json::to_string(project)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO projects (project_id, status, updated_at, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at,
                data = excluded.data",
            params![
                project.project_id,
                project.status().as_str(),
                project.updated_at(),
                json
            ],
        )?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Project>> {
        self.list_json("SELECT data FROM projects ORDER BY updated_at DESC, rowid DESC")
    }

    async fn delete(&self, project_id: &str) -> Result<bool> {
        self.delete_row("DELETE FROM projects WHERE project_id = ?1", project_id)
    }
}

#[async_trait]
impl BoardRepository for SqliteRepository {
    async fn get(&self, task_id: &str) -> Result<Option<Board>> {
        self.get_json("SELECT data FROM boards WHERE task_id = ?1", task_id)
    }

    async fn put(&self, board: &Board) -> Result<()> {
        let json = serde_json::to_string(board)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO boards (task_id, updated_at, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                updated_at = excluded.updated_at,
                data = excluded.data",
            params![board.task_id(), board.updated_at(), json],
        )?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Board>> {
        self.list_json("SELECT data FROM boards ORDER BY updated_at DESC, rowid DESC")
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        self.delete_row("DELETE FROM boards WHERE task_id = ?1", task_id)
    }
}
