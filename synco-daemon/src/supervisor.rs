//! Runs the external copy utility for one job and classifies the outcome.
//!
//! The supervisor is stateless: it holds only settings, so one instance is
//! shared by every concurrently running job. Single-flight per job is the
//! scheduler's responsibility.

use std::collections::BTreeSet;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use synco_core::{Direction, Settings, SyncJob};

use crate::record::{OutputSummary, RunOutcome, RunRecord};

/// How long to wait for output pipes to close once the child has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executes one run of a job. Implemented by [`Supervisor`]; the scheduler is
/// generic over it.
pub trait JobRunner: Send + Sync + 'static {
    /// `cancel` flips to `true` when the daemon is shutting down.
    fn execute(
        &self,
        job: Arc<SyncJob>,
        attempt: u32,
        cancel: watch::Receiver<bool>,
    ) -> impl Future<Output = RunRecord> + Send;
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    program: String,
    leading_args: Vec<String>,
    transfers: u32,
    checkers: u32,
    transient_codes: BTreeSet<i32>,
    max_output_bytes: usize,
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

type Capture = JoinHandle<std::io::Result<(Vec<u8>, bool)>>;

impl Supervisor {
    pub fn new(settings: &Settings) -> Self {
        let (program, leading_args) = match settings.command.split_first() {
            Some((program, rest)) => (program.clone(), rest.to_vec()),
            None => ("rclone".to_string(), Vec::new()),
        };
        Self {
            program,
            leading_args,
            transfers: settings.transfers,
            checkers: settings.checkers,
            transient_codes: settings.transient_exit_codes.iter().copied().collect(),
            max_output_bytes: settings.max_output_bytes,
        }
    }

    /// Argument list (after the program) for one run of `job`.
    pub fn command_args(&self, job: &SyncJob) -> Vec<String> {
        let local = job.local_path.display().to_string();
        let remote = job.remote.clone();
        let (verb, source, dest) = match job.direction {
            Direction::Push => ("sync", local, remote),
            Direction::Pull => ("sync", remote, local),
            Direction::Bidirectional => ("bisync", local, remote),
        };

        let mut args = self.leading_args.clone();
        args.extend([
            verb.to_string(),
            source,
            dest,
            "--transfers".to_string(),
            self.transfers.to_string(),
            "--checkers".to_string(),
            self.checkers.to_string(),
            "--buffer-size".to_string(),
            job.transfer.buffer_size.clone(),
            "--log-level".to_string(),
            job.transfer.log_level.clone(),
        ]);
        if let Some(limit) = &job.transfer.bwlimit {
            args.push("--bwlimit".to_string());
            args.push(limit.clone());
        }
        for pattern in &job.excludes {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        args.extend(job.transfer.extra_flags.iter().cloned());
        args
    }

    /// `None` means the child died from a signal.
    pub fn classify(&self, code: Option<i32>) -> RunOutcome {
        match code {
            Some(0) => RunOutcome::Success,
            Some(code) if self.transient_codes.contains(&code) => RunOutcome::TransientFailure,
            _ => RunOutcome::FatalFailure,
        }
    }

    /// Spawn the copy utility for `job` and wait for exit, timeout, or
    /// cancellation.
    pub async fn run(
        &self,
        job: &SyncJob,
        attempt: u32,
        mut cancel: watch::Receiver<bool>,
    ) -> RunRecord {
        let started_at = Utc::now();
        let args = self.command_args(job);
        tracing::debug!(
            job = %job.name,
            attempt,
            program = %self.program,
            args = ?args,
            "spawning copy utility",
        );

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(target_os = "linux")]
        die_with_parent(&mut command);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(
                    job = %job.name,
                    program = %self.program,
                    error = %err,
                    "failed to spawn copy utility",
                );
                return RunRecord {
                    job: job.name.clone(),
                    attempt,
                    started_at,
                    finished_at: Utc::now(),
                    outcome: RunOutcome::FatalFailure,
                    exit_code: None,
                    output: OutputSummary {
                        stderr: format!("failed to spawn {}: {err}", self.program),
                        ..OutputSummary::default()
                    },
                };
            }
        };

        let limit = self.max_output_bytes;
        let stdout = child.stdout.take().map(|s| tokio::spawn(read_bounded(s, limit)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_bounded(s, limit)));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(job.timeout) => Waited::TimedOut,
            _ = cancelled(&mut cancel) => Waited::Cancelled,
        };

        let (outcome, exit_code) = match waited {
            Waited::Exited(Ok(status)) => (self.classify(status.code()), status.code()),
            Waited::Exited(Err(err)) => {
                tracing::warn!(job = %job.name, error = %err, "waiting on copy utility failed");
                (RunOutcome::FatalFailure, None)
            }
            Waited::TimedOut => {
                tracing::warn!(
                    job = %job.name,
                    timeout_secs = job.timeout.as_secs(),
                    "copy utility exceeded timeout; killing",
                );
                terminate(&mut child, job).await;
                (RunOutcome::Timeout, None)
            }
            Waited::Cancelled => {
                tracing::info!(job = %job.name, "cancelling in-flight copy utility");
                terminate(&mut child, job).await;
                (RunOutcome::Cancelled, None)
            }
        };

        let (stdout, stdout_truncated) = collect(stdout).await;
        let (stderr, stderr_truncated) = collect(stderr).await;

        RunRecord {
            job: job.name.clone(),
            attempt,
            started_at,
            finished_at: Utc::now(),
            outcome,
            exit_code,
            output: OutputSummary {
                stdout,
                stderr,
                truncated: stdout_truncated || stderr_truncated,
            },
        }
    }
}

impl JobRunner for Supervisor {
    async fn execute(
        &self,
        job: Arc<SyncJob>,
        attempt: u32,
        cancel: watch::Receiver<bool>,
    ) -> RunRecord {
        self.run(&job, attempt, cancel).await
    }
}

/// Resolves once `cancel` flips to `true`; never, if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|flag| *flag).await.is_err();
    if closed {
        // Sender gone: nobody can cancel any more.
        std::future::pending::<()>().await;
    }
}

async fn terminate(child: &mut Child, job: &SyncJob) {
    if let Err(err) = child.start_kill() {
        tracing::warn!(job = %job.name, error = %err, "failed to kill copy utility");
    }
    if let Err(err) = child.wait().await {
        tracing::warn!(job = %job.name, error = %err, "failed to reap copy utility");
    }
}

/// Read `reader` to EOF keeping at most `limit` bytes; the rest is discarded
/// so the child never blocks on a full pipe.
/// `kill_on_drop` never runs if the daemon itself is SIGKILLed, as a forced
/// stop does. Ask the kernel to kill the child when its parent dies instead.
///
/// The death signal is tied to the spawning thread; tokio worker threads live
/// as long as the runtime.
#[cfg(target_os = "linux")]
fn die_with_parent(command: &mut Command) {
    use nix::errno::Errno;
    use nix::sys::prctl::set_pdeathsig;
    use nix::sys::signal::Signal;
    use nix::unistd::{getpid, getppid};

    let parent = getpid();
    // SAFETY: runs in the forked child before exec and only makes
    // async-signal-safe syscalls.
    unsafe {
        command.pre_exec(move || {
            set_pdeathsig(Signal::SIGKILL)?;
            // The parent may already be gone, before the prctl could fire.
            if getppid() != parent {
                return Err(Errno::ESRCH.into());
            }
            Ok(())
        });
    }
}

async fn read_bounded<R>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut chunk = vec![0u8; 8 * 1024];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
        if n > room {
            truncated = true;
        }
    }
    Ok((kept, truncated))
}

async fn collect(handle: Option<Capture>) -> (String, bool) {
    let Some(mut handle) = handle else {
        return (String::new(), false);
    };
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(Ok((bytes, truncated)))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Ok(Ok(Err(err))) => {
            tracing::debug!(error = %err, "reading copy utility output failed");
            (String::new(), false)
        }
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "output capture task failed");
            (String::new(), false)
        }
        Err(_) => {
            // A grandchild still holds the pipe open.
            handle.abort();
            (String::new(), true)
        }
    }
}
