//! Configuration loading: document shapes, defaults, and violation reporting.

use std::time::Duration;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use predicates::Predicate;
use rstest::rstest;
use synco_core::{config, ConfigError, Direction, JobName};

fn write_config(dir: &assert_fs::TempDir, body: &str) -> std::path::PathBuf {
    let file = dir.child("synco.json");
    file.write_str(body).expect("write config");
    file.path().to_path_buf()
}

fn fields_of(err: &ConfigError) -> Vec<(Option<String>, String)> {
    err.violations()
        .iter()
        .map(|v| (v.job.clone(), v.field.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// 1. Happy path
// ---------------------------------------------------------------------------

#[test]
fn bare_array_loads_jobs_in_file_order_with_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("docs").create_dir_all().expect("mkdir docs");
    home.child("photos").create_dir_all().expect("mkdir photos");
    let path = write_config(
        &home,
        r#"[
            {"name": "docs", "localPath": "docs", "remote": "gdrive:docs",
             "direction": "push", "intervalSeconds": 60, "timeoutSeconds": 30,
             "maxRetries": 2, "excludes": ["*.tmp", ".git/**"]},
            {"name": "photos", "localPath": "photos", "remote": "b2:photos",
             "direction": "pull", "intervalSeconds": 300, "someFutureField": true}
        ]"#,
    );

    let cfg = config::load(&path).expect("load");
    assert_eq!(cfg.jobs.len(), 2);
    assert_eq!(cfg.dir, home.path());

    let docs = &cfg.jobs[0];
    assert_eq!(docs.name, JobName::from("docs"));
    assert_eq!(docs.local_path, home.path().join("docs"));
    assert_eq!(docs.direction, Direction::Push);
    assert_eq!(docs.interval, Duration::from_secs(60));
    assert_eq!(docs.timeout, Duration::from_secs(30));
    assert_eq!(docs.retry.max_retries, 2);
    assert_eq!(docs.excludes, vec!["*.tmp", ".git/**"]);

    let photos = &cfg.jobs[1];
    assert_eq!(photos.direction, Direction::Pull);
    assert_eq!(photos.timeout, cfg.settings.default_timeout);
    assert_eq!(photos.retry.max_retries, cfg.settings.default_max_retries);
    assert_eq!(photos.transfer.buffer_size, "1M");
    assert!(photos.excludes.is_empty());
}

#[test]
fn object_form_applies_settings_and_overrides() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("src").create_dir_all().expect("mkdir");
    let path = write_config(
        &home,
        r#"{
            "settings": {"command": ["/usr/local/bin/rclone", "--config", "/etc/rclone.conf"],
                         "transientExitCodes": [5], "defaultMaxRetries": 1,
                         "retryBaseDelaySeconds": 4, "stopGraceSeconds": 3},
            "jobs": [
                {"name": "src", "localPath": "src", "remote": "s3:src",
                 "direction": "bidirectional", "intervalSeconds": 120,
                 "retryBaseDelaySeconds": 2, "bwlimit": "2M",
                 "extraFlags": ["--fast-list"]}
            ]
        }"#,
    );

    let cfg = config::load(&path).expect("load");
    assert_eq!(cfg.settings.command.len(), 3);
    assert_eq!(cfg.settings.transient_exit_codes, vec![5]);
    assert_eq!(cfg.settings.stop_grace, Duration::from_secs(3));

    let job = &cfg.jobs[0];
    assert_eq!(job.direction, Direction::Bidirectional);
    assert_eq!(job.retry.max_retries, 1);
    assert_eq!(job.retry.base_delay, Duration::from_secs(2));
    assert_eq!(job.transfer.bwlimit.as_deref(), Some("2M"));
    assert_eq!(job.transfer.extra_flags, vec!["--fast-list"]);
}

// ---------------------------------------------------------------------------
// 2. File-level errors
// ---------------------------------------------------------------------------

#[test]
fn missing_file_is_a_read_error_naming_the_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load(&home.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }), "got: {err}");
    assert!(predicate::str::contains("nope.json").eval(&err.to_string()));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = write_config(&home, "[{\"name\": ");
    let err = config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[rstest]
#[case::empty_array("[]")]
#[case::empty_jobs("{\"jobs\": []}")]
fn no_jobs_refuses_to_start(#[case] body: &str) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = write_config(&home, body);
    let err = config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::NoJobs { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 3. Violations
// ---------------------------------------------------------------------------

#[test]
fn every_violation_is_reported_in_one_pass() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("ok").create_dir_all().expect("mkdir");
    let path = write_config(
        &home,
        r#"[
            {"name": "a", "localPath": "missing-dir", "remote": "r:a",
             "direction": "push", "intervalSeconds": 60},
            {"name": "b", "localPath": "ok", "remote": "",
             "direction": "sideways", "intervalSeconds": 0},
            {"localPath": "ok", "remote": "r:c", "direction": "pull"}
        ]"#,
    );

    let err = config::load(&path).unwrap_err();
    let fields = fields_of(&err);
    let expected = [
        (Some("a".to_string()), "localPath".to_string()),
        (Some("b".to_string()), "remote".to_string()),
        (Some("b".to_string()), "direction".to_string()),
        (Some("b".to_string()), "intervalSeconds".to_string()),
        (Some("#3".to_string()), "name".to_string()),
        (Some("#3".to_string()), "intervalSeconds".to_string()),
    ];
    for item in &expected {
        assert!(fields.contains(item), "missing {item:?} in {fields:?}");
    }
    assert_eq!(fields.len(), expected.len(), "got: {fields:?}");

    let msg = err.to_string();
    assert!(msg.contains("6 problem(s)"), "got: {msg}");
    assert!(msg.contains("job 'b': direction"), "got: {msg}");
}

#[test]
fn duplicate_names_are_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("d").create_dir_all().expect("mkdir");
    let job = r#"{"name": "same", "localPath": "d", "remote": "r:x",
                  "direction": "push", "intervalSeconds": 10}"#;
    let path = write_config(&home, &format!("[{job}, {job}]"));

    let err = config::load(&path).unwrap_err();
    assert_eq!(
        fields_of(&err),
        vec![(Some("same".to_string()), "name".to_string())]
    );
}

#[test]
fn duplicate_is_reported_alongside_the_jobs_other_problems() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("d").create_dir_all().expect("mkdir");
    let path = write_config(
        &home,
        r#"[
            {"name": "docs", "localPath": "d", "remote": "r:docs",
             "direction": "push", "intervalSeconds": 60},
            {"name": "docs", "localPath": "d", "remote": "r:docs",
             "direction": "sideways", "intervalSeconds": 60}
        ]"#,
    );

    let err = config::load(&path).unwrap_err();
    assert_eq!(
        fields_of(&err),
        vec![
            (Some("docs".to_string()), "name".to_string()),
            (Some("docs".to_string()), "direction".to_string()),
        ]
    );
    assert!(err.to_string().contains("duplicate job name"), "got: {err}");
}

#[rstest]
#[case::interval_string(r#""intervalSeconds": "60""#, "intervalSeconds")]
#[case::negative_retries(r#""intervalSeconds": 60, "maxRetries": -1"#, "maxRetries")]
#[case::zero_timeout(r#""intervalSeconds": 60, "timeoutSeconds": 0"#, "timeoutSeconds")]
#[case::bad_glob(r#""intervalSeconds": 60, "excludes": ["[unclosed"]"#, "excludes")]
#[case::excludes_not_strings(r#""intervalSeconds": 60, "excludes": [1]"#, "excludes")]
fn typed_field_errors_name_the_field(#[case] extra: &str, #[case] field: &str) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("d").create_dir_all().expect("mkdir");
    let body = format!(
        r#"[{{"name": "j", "localPath": "d", "remote": "r:x", "direction": "push", {extra}}}]"#
    );
    let path = write_config(&home, &body);

    let err = config::load(&path).unwrap_err();
    assert_eq!(
        fields_of(&err),
        vec![(Some("j".to_string()), field.to_string())]
    );
}

#[test]
fn settings_violations_carry_no_job() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("d").create_dir_all().expect("mkdir");
    let path = write_config(
        &home,
        r#"{"settings": {"command": [], "transientExitCodes": [0]},
            "jobs": [{"name": "j", "localPath": "d", "remote": "r:x",
                      "direction": "push", "intervalSeconds": 5}]}"#,
    );

    let err = config::load(&path).unwrap_err();
    assert_eq!(
        fields_of(&err),
        vec![
            (None, "settings.command".to_string()),
            (None, "settings.transientExitCodes".to_string()),
        ]
    );
}
