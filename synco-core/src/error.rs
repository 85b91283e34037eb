//! Error types for synco-core.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// One validation problem found in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Job name, or `#<index>` when the job has no usable name.
    /// `None` for problems outside any job (settings, document shape).
    pub job: Option<String>,
    /// Offending field, in configuration-file spelling.
    pub field: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job {
            Some(job) => write!(f, "job '{job}': {}: {}", self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// All errors that can arise while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read (missing, permission denied, ...).
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The document parsed but one or more fields are invalid.
    #[error("invalid config {path}: {}", render_violations(.violations))]
    Invalid {
        path: PathBuf,
        violations: Vec<Violation>,
    },

    /// The document is valid but declares no jobs.
    #[error("config {path} declares no jobs")]
    NoJobs { path: PathBuf },
}

impl ConfigError {
    /// Every violation carried by this error (empty for non-validation errors).
    pub fn violations(&self) -> &[Violation] {
        match self {
            ConfigError::Invalid { violations, .. } => violations,
            _ => &[],
        }
    }
}

fn render_violations(violations: &[Violation]) -> String {
    let mut out = format!("{} problem(s)", violations.len());
    for v in violations {
        out.push_str("\n  - ");
        out.push_str(&v.to_string());
    }
    out
}
