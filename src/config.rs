//! Service configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::grading::DEFAULT_PASS_MARK;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Directory for the SQLite database. Unset means the in-memory store
    /// (state lost on restart).
    pub state_dir: Option<PathBuf>,
    /// Pass mark for numeric (panelist/examiner) aggregation, inclusive.
    pub pass_mark: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let pass_mark = parse_pass_mark(env::var("PASS_MARK").ok().as_deref())?;

        Ok(Config {
            port,
            state_dir,
            pass_mark,
        })
    }

    /// The database file path, when a durable store is configured.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join("gradflow.db"))
    }
}

/// Parse a PASS_MARK value. Split out so the bounds check is testable without
/// touching the process environment.
pub fn parse_pass_mark(value: Option<&str>) -> Result<f64> {
    match value {
        None => Ok(DEFAULT_PASS_MARK),
        Some(raw) => {
            let value = raw
                .parse::<f64>()
                .context("PASS_MARK must be a valid number")?;
            anyhow::ensure!(
                (0.0..=100.0).contains(&value),
                "PASS_MARK must be between 0 and 100, got {value}"
            );
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pass_mark_default() {
        assert_eq!(parse_pass_mark(None).unwrap(), DEFAULT_PASS_MARK);
    }

    #[test]
    fn test_parse_pass_mark_valid() {
        assert_eq!(parse_pass_mark(Some("65")).unwrap(), 65.0);
        assert_eq!(parse_pass_mark(Some("50.5")).unwrap(), 50.5);
    }

    #[test]
    fn test_parse_pass_mark_rejects_out_of_range() {
        assert!(parse_pass_mark(Some("101")).is_err());
        assert!(parse_pass_mark(Some("-1")).is_err());
        assert!(parse_pass_mark(Some("sixty")).is_err());
    }
}
