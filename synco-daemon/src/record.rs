//! Ephemeral per-run records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use synco_core::JobName;

/// Classification of one run of the copy utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    Success,
    TransientFailure,
    FatalFailure,
    Timeout,
    /// Interrupted by daemon shutdown.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunOutcome::Success => "success",
            RunOutcome::TransientFailure => "transient-failure",
            RunOutcome::FatalFailure => "fatal-failure",
            RunOutcome::Timeout => "timeout",
            RunOutcome::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Bounded capture of the subprocess's output streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputSummary {
    pub stdout: String,
    pub stderr: String,
    /// At least one stream exceeded the capture bound.
    pub truncated: bool,
}

/// Result of one run. Produced by the supervisor, consumed by the retry
/// policy and the reporter, then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub job: JobName,
    /// 0 for the scheduled run, n for the n-th retry in the same cycle.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    pub output: OutputSummary,
}

impl RunRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
