//! Key-value settings storage backed by SQLite.
//!
//! Shares a database with [`CredentialStore`](crate::credentials::CredentialStore)
//! and [`SqliteRepository`](crate::repository::SqliteRepository). Pass the same
//! path to all three.

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use std::sync::Mutex;

/// Keys that `config set` accepts.
pub const KNOWN_KEYS: &[&str] = &["provider", "model", "base_url", "reports_dir", "language"];

/// Persistent key-value settings store.
pub struct Settings {
    conn: Mutex<Connection>,
}

impl Settings {
    /// Open or create the settings table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open settings database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create settings table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Set a value (upsert). Unknown keys are rejected.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if !KNOWN_KEYS.contains(&key) {
            bail!(
                "unknown setting: {key} (expected one of {})",
                KNOWN_KEYS.join(", ")
            );
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }

    /// All stored pairs, sorted by key.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key ASC")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// CLI value first, then the stored one.
    pub fn resolve(&self, cli_value: Option<String>, key: &str) -> Result<Option<String>> {
        match cli_value {
            Some(value) => Ok(Some(value)),
            None => self.get(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_settings() -> Settings {
        Settings::open(":memory:").unwrap()
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let settings = mem_settings();
        assert!(settings.get("model").unwrap().is_none());
    }

    #[test]
    fn set_overwrites_existing() {
        let settings = mem_settings();
        settings.set("model", "old").unwrap();
        settings.set("model", "new").unwrap();
        assert_eq!(settings.get("model").unwrap().unwrap(), "new");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let settings = mem_settings();
        let err = settings.set("theme", "dark").unwrap_err();
        assert!(err.to_string().contains("unknown setting: theme"));
        assert!(settings.get("theme").unwrap().is_none());
    }

    #[test]
    fn remove_nonexistent_is_ok() {
        let settings = mem_settings();
        settings.remove("language").unwrap();
    }

    #[test]
    fn list_is_sorted() {
        let settings = mem_settings();
        settings.set("provider", "openai").unwrap();
        settings.set("language", "en").unwrap();
        assert_eq!(
            settings.list().unwrap(),
            vec![
                ("language".to_string(), "en".to_string()),
                ("provider".to_string(), "openai".to_string()),
            ]
        );
    }

    #[test]
    fn cli_value_wins_over_stored() {
        let settings = mem_settings();
        settings.set("model", "stored").unwrap();
        assert_eq!(
            settings
                .resolve(Some("flag".to_string()), "model")
                .unwrap()
                .as_deref(),
            Some("flag")
        );
        assert_eq!(
            settings.resolve(None, "model").unwrap().as_deref(),
            Some("stored")
        );
        assert!(settings.resolve(None, "base_url").unwrap().is_none());
    }

    #[test]
    fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings-test.db");
        let path_str = path.to_str().unwrap();

        {
            let settings = Settings::open(path_str).unwrap();
            settings.set("reports_dir", "/tmp/reports").unwrap();
        }

        {
            let settings = Settings::open(path_str).unwrap();
            assert_eq!(
                settings.get("reports_dir").unwrap().unwrap(),
                "/tmp/reports"
            );
        }
    }
}
