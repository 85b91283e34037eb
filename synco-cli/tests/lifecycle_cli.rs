use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn synco_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_synco"))
}

/// Write a one-job config whose "rclone" is `sh -c <script>`.
fn write_config(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("synco.json");
    let document = serde_json::json!({
        "settings": {
            "command": ["sh", "-c", script, "synco-test"],
            "startupJitterMillis": 0,
            "stopGraceSeconds": 5
        },
        "jobs": [{
            "name": "docs",
            "localPath": ".",
            "remote": "remote:docs",
            "direction": "push",
            "intervalSeconds": 60,
            "maxRetries": 0
        }]
    });
    fs::write(&path, document.to_string()).expect("write config");
    path
}

fn pid_file(dir: &Path) -> PathBuf {
    dir.join("synco.pid")
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

/// A pid that is certainly not running.
fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().expect("spawn true");
    let pid = child.id();
    child.wait().expect("reap true");
    pid
}

struct DaemonProcess {
    child: Child,
}

impl DaemonProcess {
    fn start(config: &Path) -> Self {
        let child = synco_cmd()
            .arg("--config")
            .arg(config)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self { child }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn start_creates_lock_and_stop_removes_it() {
    let dir = TempDir::new().expect("config dir");
    let config = write_config(dir.path(), "sleep 5");
    let lock = pid_file(dir.path());

    let mut daemon = DaemonProcess::start(&config);
    assert!(
        wait_until(Duration::from_secs(10), || lock.exists()),
        "daemon did not create its pid file in time",
    );
    let recorded = fs::read_to_string(&lock).expect("read pid file");
    assert_eq!(recorded.trim(), daemon.pid().to_string());

    synco_cmd()
        .arg("-c")
        .arg(&config)
        .arg("--status")
        .assert()
        .success()
        .stdout(contains(format!("pid {}", daemon.pid())));

    // A second start against the same directory is refused.
    synco_cmd()
        .arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(contains("already running"));
    assert_eq!(fs::read_to_string(&lock).expect("read pid file"), recorded);

    synco_cmd()
        .arg("-c")
        .arg(&config)
        .arg("--stop")
        .assert()
        .success();
    assert!(!lock.exists());

    let status = daemon.child.wait().expect("wait daemon");
    assert!(status.success(), "daemon exited with {status}");

    synco_cmd()
        .arg("-c")
        .arg(&config)
        .arg("--stop")
        .assert()
        .code(1)
        .stderr(contains("not running"));
}

#[test]
fn once_runs_every_job_and_exits_zero() {
    let dir = TempDir::new().expect("config dir");
    let marker = dir.path().join("ran");
    let config = write_config(dir.path(), &format!("touch '{}'", marker.display()));

    synco_cmd().arg("-c").arg(&config).arg("--once").assert().success();

    assert!(marker.exists());
    assert!(!pid_file(dir.path()).exists());
}

#[test]
fn stale_lock_does_not_block_start() {
    let dir = TempDir::new().expect("config dir");
    let config = write_config(dir.path(), "exit 0");
    fs::write(pid_file(dir.path()), format!("{}\n", dead_pid())).expect("write stale lock");

    synco_cmd()
        .arg("-c")
        .arg(&config)
        .arg("--status")
        .assert()
        .code(1)
        .stdout(contains("stale lock"));

    synco_cmd().arg("-c").arg(&config).arg("--once").assert().success();
    assert!(!pid_file(dir.path()).exists());
}

#[test]
fn no_create_pid_skips_the_lock() {
    let dir = TempDir::new().expect("config dir");
    let config = write_config(dir.path(), "exit 0");
    fs::write(pid_file(dir.path()), format!("{}\n", std::process::id())).expect("write lock");

    // A live lock would refuse a normal start; without a pid file it is ignored.
    synco_cmd()
        .arg("-c")
        .arg(&config)
        .args(["--once", "--no-create-pid"])
        .assert()
        .success();
    assert_eq!(
        fs::read_to_string(pid_file(dir.path())).expect("read lock").trim(),
        std::process::id().to_string()
    );
}

#[test]
fn invalid_config_lists_every_problem_and_exits_one() {
    let dir = TempDir::new().expect("config dir");
    let config = dir.path().join("synco.json");
    fs::write(
        &config,
        r#"[{"name": "photos", "localPath": ".", "remote": "r:photos", "direction": "sideways"},
            {"name": "docs", "localPath": ".", "remote": "r:docs", "direction": "push", "intervalSeconds": 60},
            {"name": "docs", "localPath": ".", "remote": "r:docs", "direction": "pull", "intervalSeconds": 60}]"#,
    )
    .expect("write config");

    synco_cmd()
        .arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(contains("direction"))
        .stderr(contains("intervalSeconds"))
        .stderr(contains("duplicate"));
    assert!(!pid_file(dir.path()).exists());
}

#[test]
fn stop_kills_a_daemon_that_ignores_sigterm() {
    let dir = TempDir::new().expect("config dir");
    let config = write_config(dir.path(), "exit 0");

    let mut stubborn = Command::new("sh")
        .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
        .spawn()
        .expect("spawn stubborn process");
    fs::write(pid_file(dir.path()), format!("{}\n", stubborn.id())).expect("write lock");
    // Give the shell time to install its trap.
    sleep(Duration::from_millis(300));

    synco_cmd()
        .arg("-c")
        .arg(&config)
        .args(["--stop", "--grace", "1"])
        .assert()
        .code(2);
    assert!(!pid_file(dir.path()).exists());

    let _ = stubborn.kill();
    let _ = stubborn.wait();
}

/// Running and not a zombie, per `/proc/<pid>/stat`.
#[cfg(target_os = "linux")]
fn process_running(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .map_or(false, |(_, rest)| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[test]
fn killed_daemon_takes_its_running_job_with_it() {
    let dir = TempDir::new().expect("config dir");
    let marker = dir.path().join("job.pid");
    let config = write_config(
        dir.path(),
        &format!("echo $$ > '{}'; exec sleep 30", marker.display()),
    );

    let mut daemon = DaemonProcess::start(&config);
    assert!(
        wait_until(Duration::from_secs(10), || {
            fs::read_to_string(&marker).map_or(false, |s| s.ends_with('\n'))
        }),
        "job did not start in time",
    );
    let job_pid: u32 = fs::read_to_string(&marker)
        .expect("read job pid")
        .trim()
        .parse()
        .expect("job pid");
    assert!(process_running(job_pid));

    // What a forced stop does to the daemon: no chance to clean up.
    Command::new("kill")
        .args(["-KILL", &daemon.pid().to_string()])
        .status()
        .expect("send SIGKILL");
    daemon.child.wait().expect("wait daemon");

    let gone = wait_until(Duration::from_secs(5), || !process_running(job_pid));
    if !gone {
        let _ = Command::new("kill").args(["-KILL", &job_pid.to_string()]).status();
    }
    assert!(gone, "job {job_pid} outlived its daemon");
}
