//! Project-wide constants and defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Default Anthropic model when none is specified.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for OpenAI-compatible endpoints.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Default base URL for OpenAI-compatible endpoints.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Where research reports land unless configured otherwise.
pub const DEFAULT_REPORTS_DIR: &str = "research_reports";

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

/// Default content language for generated decks.
pub const DEFAULT_LANGUAGE: &str = "zh";

/// Default database path: `~/.slidewright/slidewright.db`.
/// Single DB for projects, boards, credentials, and settings.
pub fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".slidewright").join("slidewright.db"))
}

/// Seconds since the Unix epoch, with microsecond precision.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
