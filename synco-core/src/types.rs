//! Domain types for synco jobs.
//!
//! All path fields use `PathBuf`. Jobs are immutable once loaded and are
//! shared with the scheduler behind an `Arc`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed job identifier. Unique within one configuration file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobName(pub String);

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for JobName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which side of a job is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local path → remote.
    Push,
    /// Remote → local path.
    Pull,
    /// Two-way reconciliation.
    Bidirectional,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
            Direction::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            "bidirectional" => Ok(Self::Bidirectional),
            other => Err(format!(
                "unknown direction '{other}'; expected: push, pull, bidirectional"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Effective retry parameters for one job, after per-job overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Maximum number of re-attempts inside one scheduling cycle.
    pub max_retries: u32,
    /// Delay before the first re-attempt; doubles for each further one.
    pub base_delay: Duration,
}

/// Transfer tuning passed through to the copy utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub buffer_size: String,
    pub log_level: String,
    pub bwlimit: Option<String>,
    pub extra_flags: Vec<String>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            buffer_size: "1M".to_string(),
            log_level: "ERROR".to_string(),
            bwlimit: None,
            extra_flags: Vec::new(),
        }
    }
}

/// One configured local-path/remote-target synchronization unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub name: JobName,
    /// Absolute, or resolved against the configuration directory at load.
    pub local_path: PathBuf,
    pub remote: String,
    pub direction: Direction,
    pub interval: Duration,
    pub excludes: Vec<String>,
    pub timeout: Duration,
    pub retry: RetrySettings,
    pub transfer: TransferOptions,
}

/// Daemon-wide settings shared by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Program followed by leading arguments, e.g. `["rclone"]`.
    pub command: Vec<String>,
    pub transfers: u32,
    pub checkers: u32,
    /// Exit codes classified as transient (retryable) failures.
    pub transient_exit_codes: Vec<i32>,
    /// Upper bound on captured bytes per output stream.
    pub max_output_bytes: usize,
    pub retry_base_delay: Duration,
    pub default_timeout: Duration,
    pub default_max_retries: u32,
    pub startup_jitter: Duration,
    pub stop_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command: vec!["rclone".to_string()],
            transfers: 1,
            checkers: 1,
            // rclone: 5 = temporary error, 10 = duration exceeded.
            transient_exit_codes: vec![5, 10],
            max_output_bytes: 64 * 1024,
            retry_base_delay: Duration::from_secs(1),
            default_timeout: Duration::from_secs(600),
            default_max_retries: 3,
            startup_jitter: Duration::from_millis(2000),
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// A loaded and validated configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Jobs in file order.
    pub jobs: Vec<SyncJob>,
    pub settings: Settings,
    /// Directory containing the configuration file; holds the pid file.
    pub dir: PathBuf,
}
