//! JSON configuration loading and validation.
//!
//! # Document shapes
//!
//! ```text
//! [ { "name": "docs", "localPath": "...", ... }, ... ]
//!
//! { "settings": { "command": ["rclone"], ... },
//!   "jobs": [ { "name": "docs", ... }, ... ] }
//! ```
//!
//! Validation never stops at the first problem: every violation in the file
//! is collected and returned together in [`ConfigError::Invalid`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, Violation};
use crate::types::{
    Config, Direction, JobName, RetrySettings, Settings, SyncJob, TransferOptions,
};

/// Name of the pid file written next to the configuration file.
pub const PID_FILE_NAME: &str = "synco.pid";

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "synco.json";

/// Load and validate the configuration at `path`.
///
/// Relative `localPath` values resolve against the file's directory.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, path, &config_dir(path))
}

/// Directory holding the configuration file; `.` for a bare file name.
pub fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Validate an in-memory document as if it had been read from `path`.
pub fn parse(contents: &str, path: &Path, dir: &Path) -> Result<Config, ConfigError> {
    let document: Value = serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut violations = Vec::new();
    let (jobs_value, settings_value) = split_document(document, &mut violations);
    let settings = parse_settings(settings_value, &mut violations);

    let mut jobs = Vec::new();
    let mut seen = HashSet::new();
    for (index, value) in jobs_value.into_iter().enumerate() {
        // Names are claimed before field validation so a duplicate is
        // reported even when the job has other problems too.
        if let Some(name) = usable_name(&value) {
            if !seen.insert(name.to_string()) {
                violations.push(Violation {
                    job: Some(name.to_string()),
                    field: "name".to_string(),
                    message: "duplicate job name".to_string(),
                });
            }
        }
        if let Some(job) = parse_job(index, value, &settings, dir, &mut violations) {
            jobs.push(job);
        }
    }

    if !violations.is_empty() {
        return Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            violations,
        });
    }
    if jobs.is_empty() {
        return Err(ConfigError::NoJobs {
            path: path.to_path_buf(),
        });
    }

    Ok(Config {
        jobs,
        settings,
        dir: dir.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

/// Document as written. Fields stay untyped so that each type error becomes
/// a [`Violation`] instead of aborting deserialization.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Bare(Vec<Value>),
    Wrapped {
        jobs: Option<Value>,
        settings: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    command: Option<Value>,
    transfers: Option<Value>,
    checkers: Option<Value>,
    transient_exit_codes: Option<Value>,
    max_output_bytes: Option<Value>,
    retry_base_delay_seconds: Option<Value>,
    default_timeout_seconds: Option<Value>,
    default_max_retries: Option<Value>,
    startup_jitter_millis: Option<Value>,
    stop_grace_seconds: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJob {
    name: Option<Value>,
    local_path: Option<Value>,
    remote: Option<Value>,
    direction: Option<Value>,
    interval_seconds: Option<Value>,
    excludes: Option<Value>,
    timeout_seconds: Option<Value>,
    max_retries: Option<Value>,
    retry_base_delay_seconds: Option<Value>,
    buffer_size: Option<Value>,
    log_level: Option<Value>,
    bwlimit: Option<Value>,
    extra_flags: Option<Value>,
}

fn split_document(document: Value, violations: &mut Vec<Violation>) -> (Vec<Value>, Option<Value>) {
    match serde_json::from_value::<RawDocument>(document) {
        Ok(RawDocument::Bare(jobs)) => (jobs, None),
        Ok(RawDocument::Wrapped { jobs, settings }) => match jobs {
            Some(Value::Array(jobs)) => (jobs, settings),
            Some(_) => {
                violations.push(doc_violation("jobs", "must be an array of job objects"));
                (Vec::new(), settings)
            }
            None => {
                violations.push(doc_violation("jobs", "missing required field"));
                (Vec::new(), settings)
            }
        },
        Err(_) => {
            violations.push(doc_violation(
                "document",
                "must be an array of jobs or an object with a `jobs` array",
            ));
            (Vec::new(), None)
        }
    }
}

/// Deserialize an object into its raw form. Arrays are refused even though
/// serde would accept them positionally for a struct.
fn raw_object<T: DeserializeOwned>(value: Value) -> Option<T> {
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn doc_violation(field: &str, message: &str) -> Violation {
    Violation {
        job: None,
        field: field.to_string(),
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Typed checks with violation collection
// ---------------------------------------------------------------------------

struct Check<'a> {
    job: Option<String>,
    prefix: &'static str,
    violations: &'a mut Vec<Violation>,
}

impl Check<'_> {
    fn report(&mut self, field: &str, message: impl Into<String>) {
        self.violations.push(Violation {
            job: self.job.clone(),
            field: format!("{}{field}", self.prefix),
            message: message.into(),
        });
    }

    fn required<'v>(&mut self, field: &str, value: Option<&'v Value>) -> Option<&'v Value> {
        if value.is_none() {
            self.report(field, "missing required field");
        }
        value
    }

    fn string(&mut self, field: &str, value: Option<&Value>) -> Option<String> {
        match value?.as_str() {
            Some(s) if s.trim().is_empty() => {
                self.report(field, "must not be empty");
                None
            }
            Some(s) => Some(s.to_string()),
            None => {
                self.report(field, "must be a string");
                None
            }
        }
    }

    fn required_string(&mut self, field: &str, value: Option<&Value>) -> Option<String> {
        let value = self.required(field, value);
        self.string(field, value)
    }

    fn integer(&mut self, field: &str, value: Option<&Value>, min: u64) -> Option<u64> {
        let max = u64::from(u32::MAX);
        match value?.as_u64() {
            Some(n) if n < min => {
                self.report(field, format!("must be at least {min}, got {n}"));
                None
            }
            Some(n) if n > max => {
                self.report(field, format!("must be at most {max}, got {n}"));
                None
            }
            Some(n) => Some(n),
            None if min > 0 => {
                self.report(field, "must be a positive integer");
                None
            }
            None => {
                self.report(field, "must be a non-negative integer");
                None
            }
        }
    }

    fn string_list(&mut self, field: &str, value: Option<&Value>) -> Option<Vec<String>> {
        let Some(items) = value?.as_array() else {
            self.report(field, "must be an array of strings");
            return None;
        };
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) => out.push(s.to_string()),
                None => {
                    self.report(field, format!("element {i} must be a string"));
                    return None;
                }
            }
        }
        Some(out)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn parse_settings(value: Option<Value>, violations: &mut Vec<Violation>) -> Settings {
    let mut settings = Settings::default();
    let Some(value) = value else {
        return settings;
    };
    let Some(raw) = raw_object::<RawSettings>(value) else {
        violations.push(doc_violation("settings", "must be an object"));
        return settings;
    };

    let mut c = Check {
        job: None,
        prefix: "settings.",
        violations,
    };

    if let Some(command) = c.string_list("command", raw.command.as_ref()) {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            c.report("command", "must name a program");
        } else {
            settings.command = command;
        }
    }
    if let Some(n) = c.integer("transfers", raw.transfers.as_ref(), 1) {
        settings.transfers = n as u32;
    }
    if let Some(n) = c.integer("checkers", raw.checkers.as_ref(), 1) {
        settings.checkers = n as u32;
    }
    if let Some(codes) = &raw.transient_exit_codes {
        match parse_exit_codes(codes) {
            Ok(codes) => settings.transient_exit_codes = codes,
            Err(message) => c.report("transientExitCodes", message),
        }
    }
    if let Some(n) = c.integer("maxOutputBytes", raw.max_output_bytes.as_ref(), 1) {
        settings.max_output_bytes = n as usize;
    }
    if let Some(n) = c.integer("retryBaseDelaySeconds", raw.retry_base_delay_seconds.as_ref(), 1) {
        settings.retry_base_delay = Duration::from_secs(n);
    }
    if let Some(n) = c.integer("defaultTimeoutSeconds", raw.default_timeout_seconds.as_ref(), 1) {
        settings.default_timeout = Duration::from_secs(n);
    }
    if let Some(n) = c.integer("defaultMaxRetries", raw.default_max_retries.as_ref(), 0) {
        settings.default_max_retries = n as u32;
    }
    if let Some(n) = c.integer("startupJitterMillis", raw.startup_jitter_millis.as_ref(), 0) {
        settings.startup_jitter = Duration::from_millis(n);
    }
    if let Some(n) = c.integer("stopGraceSeconds", raw.stop_grace_seconds.as_ref(), 1) {
        settings.stop_grace = Duration::from_secs(n);
    }

    settings
}

fn parse_exit_codes(value: &Value) -> Result<Vec<i32>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "must be an array of exit codes".to_string())?;
    items
        .iter()
        .map(|item| match item.as_u64() {
            Some(code @ 1..=255) => Ok(code as i32),
            _ => Err(format!("{item} is not an exit code in 1..=255")),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

fn usable_name(value: &Value) -> Option<&str> {
    value
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn parse_job(
    index: usize,
    value: Value,
    settings: &Settings,
    dir: &Path,
    violations: &mut Vec<Violation>,
) -> Option<SyncJob> {
    let label = usable_name(&value)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", index + 1));

    let Some(raw) = raw_object::<RawJob>(value) else {
        violations.push(Violation {
            job: Some(label),
            field: "job".to_string(),
            message: "must be an object".to_string(),
        });
        return None;
    };

    let before = violations.len();
    let mut c = Check {
        job: Some(label),
        prefix: "",
        violations,
    };

    let name = c.required_string("name", raw.name.as_ref());
    let local_path = c
        .required_string("localPath", raw.local_path.as_ref())
        .and_then(|raw_path| {
            let path = resolve(dir, &raw_path);
            match check_readable(&path) {
                Ok(()) => Some(path),
                Err(message) => {
                    c.report("localPath", message);
                    None
                }
            }
        });
    let remote = c.required_string("remote", raw.remote.as_ref());
    let direction = c
        .required_string("direction", raw.direction.as_ref())
        .and_then(|raw_direction| match raw_direction.parse::<Direction>() {
            Ok(direction) => Some(direction),
            Err(message) => {
                c.report("direction", message);
                None
            }
        });
    let interval_value = c.required("intervalSeconds", raw.interval_seconds.as_ref());
    let interval = c.integer("intervalSeconds", interval_value, 1);
    let excludes = c
        .string_list("excludes", raw.excludes.as_ref())
        .unwrap_or_default();
    for pattern in &excludes {
        if let Err(err) = glob::Pattern::new(pattern) {
            c.report("excludes", format!("invalid glob '{pattern}': {err}"));
        }
    }
    let timeout = c
        .integer("timeoutSeconds", raw.timeout_seconds.as_ref(), 1)
        .map(Duration::from_secs)
        .unwrap_or(settings.default_timeout);
    let max_retries = c
        .integer("maxRetries", raw.max_retries.as_ref(), 0)
        .map(|n| n as u32)
        .unwrap_or(settings.default_max_retries);
    let base_delay = c
        .integer("retryBaseDelaySeconds", raw.retry_base_delay_seconds.as_ref(), 1)
        .map(Duration::from_secs)
        .unwrap_or(settings.retry_base_delay);

    let defaults = TransferOptions::default();
    let transfer = TransferOptions {
        buffer_size: c
            .string("bufferSize", raw.buffer_size.as_ref())
            .unwrap_or(defaults.buffer_size),
        log_level: c
            .string("logLevel", raw.log_level.as_ref())
            .unwrap_or(defaults.log_level),
        bwlimit: c.string("bwlimit", raw.bwlimit.as_ref()),
        extra_flags: c
            .string_list("extraFlags", raw.extra_flags.as_ref())
            .unwrap_or_default(),
    };

    if c.violations.len() > before {
        return None;
    }

    Some(SyncJob {
        name: JobName::from(name?),
        local_path: local_path?,
        remote: remote?,
        direction: direction?,
        interval: Duration::from_secs(interval?),
        excludes,
        timeout,
        retry: RetrySettings {
            max_retries,
            base_delay,
        },
        transfer,
    })
}

fn resolve(dir: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        dir.join(path)
    }
}

fn check_readable(path: &Path) -> Result<(), String> {
    let meta = fs::metadata(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let opened = if meta.is_dir() {
        fs::read_dir(path).map(|_| ())
    } else {
        fs::File::open(path).map(|_| ())
    };
    opened.map_err(|e| format!("{} is not readable: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_local_paths_resolve_against_config_dir() {
        assert_eq!(
            resolve(Path::new("/etc/synco"), "docs"),
            PathBuf::from("/etc/synco/docs")
        );
        assert_eq!(
            resolve(Path::new("/etc/synco"), "/srv/docs"),
            PathBuf::from("/srv/docs")
        );
    }

    #[test]
    fn exit_codes_reject_zero_and_out_of_range() {
        assert_eq!(parse_exit_codes(&serde_json::json!([5, 10])), Ok(vec![5, 10]));
        assert!(parse_exit_codes(&serde_json::json!([0])).is_err());
        assert!(parse_exit_codes(&serde_json::json!([256])).is_err());
        assert!(parse_exit_codes(&serde_json::json!("5")).is_err());
    }

    #[test]
    fn raw_job_keeps_unknown_and_mistyped_fields_for_reporting() {
        let raw: RawJob = raw_object(serde_json::json!({
            "name": 7,
            "intervalSeconds": "60",
            "someFutureField": true
        }))
        .expect("object deserializes");
        assert_eq!(raw.name, Some(serde_json::json!(7)));
        assert_eq!(raw.interval_seconds, Some(serde_json::json!("60")));
        assert!(raw.remote.is_none());

        assert!(raw_object::<RawJob>(serde_json::json!(["docs", "."])).is_none());
    }
}
