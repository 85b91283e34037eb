//! Daemon process wiring.
//!
//! [`run`] loads the configuration, installs the SIGTERM handler and claims
//! the pid lock, in that order. It then drives the scheduler and the log
//! rotation task until the scheduler finishes or a signal asks it to cancel.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

use synco_core::config;

use crate::error::{io_err, DaemonError};
use crate::lifecycle::PidLock;
use crate::log_rotation::rotation_task;
use crate::report::TracingReporter;
use crate::scheduler::{DaemonState, ScheduleMode, Scheduler, SchedulerOptions};
use crate::supervisor::Supervisor;

/// How a daemon process was asked to start.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub mode: ScheduleMode,
    /// Claim `synco.pid` in the configuration directory.
    pub create_pid: bool,
    pub log_json: bool,
}

/// Start the daemon on a fresh multi-thread runtime and block until it exits.
pub fn start_blocking(options: &DaemonOptions) -> Result<DaemonState, DaemonError> {
    init_tracing(options.log_json);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options.clone()))
}

/// Run the daemon until the scheduler finishes or a shutdown signal arrives.
///
/// Start order: load configuration, install signal handlers, claim the pid
/// lock. Nothing is scheduled unless all three succeed.
pub async fn run(options: DaemonOptions) -> Result<DaemonState, DaemonError> {
    let config = config::load(&options.config_path)?;
    for job in &config.jobs {
        tracing::info!(
            job = %job.name,
            direction = %job.direction,
            local = %job.local_path.display(),
            remote = %job.remote,
            interval_secs = job.interval.as_secs(),
            "job loaded",
        );
    }

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;

    let lock = if options.create_pid {
        Some(PidLock::acquire(&config.dir)?)
    } else {
        None
    };

    let runner = Arc::new(Supervisor::new(&config.settings));
    let (scheduler, handle) = Scheduler::new(
        &config.jobs,
        runner,
        Arc::new(TracingReporter),
        DaemonState::new(std::process::id()),
        SchedulerOptions {
            mode: options.mode,
            startup_jitter: config.settings.startup_jitter,
        },
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let rotation_handle = tokio::spawn(rotation_task(config.dir.clone(), shutdown_tx.subscribe()));
    let mut scheduler_task = tokio::spawn(scheduler.run());

    tracing::info!(jobs = config.jobs.len(), mode = ?options.mode, "synco started");

    let joined = tokio::select! {
        joined = &mut scheduler_task => joined,
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, cancelling jobs");
            handle.cancel();
            scheduler_task.await
        }
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, cancelling jobs");
            handle.cancel();
            scheduler_task.await
        }
    };

    let _ = shutdown_tx.send(());
    handle_join("log_rotation", rotation_handle.await)?;
    let state = handle_join("scheduler", joined)?;

    drop(lock);
    tracing::info!("synco stopped");
    Ok(state)
}

fn handle_join<T>(
    task: &'static str,
    result: Result<T, tokio::task::JoinError>,
) -> Result<T, DaemonError> {
    result.map_err(|err| DaemonError::Join {
        task,
        message: err.to_string(),
    })
}

/// Install the global subscriber. Events go to stderr, which the launch
/// wrapper redirects into `synco.log`. Safe to call more than once.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    use crate::error::LifecycleError;
    use crate::paths::pid_path;

    fn write_config(dir: &TempDir, command: &str) -> PathBuf {
        let path = dir.path().join("synco.json");
        let document = serde_json::json!({
            "settings": {
                "command": ["sh", "-c", command, "synco-test"],
                "startupJitterMillis": 0
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
        fs::write(&path, document.to_string()).unwrap();
        path
    }

    fn options(config_path: PathBuf, create_pid: bool) -> DaemonOptions {
        DaemonOptions {
            config_path,
            mode: ScheduleMode::Once,
            create_pid,
            log_json: false,
        }
    }

    #[tokio::test]
    async fn once_mode_runs_every_job_and_releases_the_lock() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "exit 0");

        let state = run(options(config_path, true)).await.unwrap();
        assert!(state.active.is_empty());
        assert!(!pid_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn invalid_config_fails_before_the_lock_is_taken() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("synco.json");
        fs::write(&config_path, "[]").unwrap();

        let err = run(options(config_path, true)).await.unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
        assert!(!pid_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn live_lock_holder_blocks_start() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "exit 0");
        let mut holder = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(pid_path(dir.path()), format!("{}\n", holder.id())).unwrap();

        let err = run(options(config_path, true)).await.unwrap_err();
        holder.kill().unwrap();
        holder.wait().unwrap();

        assert!(matches!(
            err,
            DaemonError::Lifecycle(LifecycleError::AlreadyRunning { .. })
        ));
        assert!(pid_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn no_create_pid_leaves_the_directory_alone() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "exit 0");

        run(options(config_path, false)).await.unwrap();
        assert!(!pid_path(dir.path()).exists());
    }
}
