//! Provider API keys, stored in the shared SQLite database.

use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Manages API-key storage in SQLite.
///
/// Shares a database with [`Settings`](crate::config::Settings) and
/// [`SqliteRepository`](crate::repository::SqliteRepository).
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Open or create the credentials table in the given database path.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open credentials database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS credentials (
                provider TEXT PRIMARY KEY,
                api_key  TEXT NOT NULL
            )",
        )
        .context("failed to create credentials table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stored key for a provider.
    pub fn get(&self, provider: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT api_key FROM credentials WHERE provider = ?1")?;
        let mut rows = stmt.query([provider])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Store a key for a provider (upsert).
    pub fn set(&self, provider: &str, api_key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO credentials (provider, api_key) VALUES (?1, ?2)
             ON CONFLICT(provider) DO UPDATE SET api_key = excluded.api_key",
            [provider, api_key],
        )?;
        Ok(())
    }

    pub fn remove(&self, provider: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM credentials WHERE provider = ?1", [provider])?;
        Ok(())
    }

    /// Stored key first, then the environment variable.
    pub fn get_api_key(&self, provider: &str, env_var: &str) -> Result<Option<String>> {
        if let Some(key) = self.get(provider)? {
            return Ok(Some(key));
        }

        if let Ok(key) = std::env::var(env_var)
            && !key.is_empty()
        {
            return Ok(Some(key));
        }

        Ok(None)
    }

    /// Human-readable auth status for the banner.
    pub fn status(&self, provider: &str, env_var: &str) -> Result<&'static str> {
        if self.get(provider)?.is_some() {
            return Ok("API key ✓");
        }
        let from_env = std::env::var(env_var)
            .map(|k| !k.is_empty())
            .unwrap_or(false);
        Ok(if from_env {
            "API key (env) ✓"
        } else {
            "not authenticated"
        })
    }
}
