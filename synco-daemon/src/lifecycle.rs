//! Pid-file lock and the start/stop protocol.
//!
//! The lock is `synco.pid` in the configuration directory, holding one line
//! with the owner's pid. It is only ever created whole: the pid is written to
//! a private temp file first, then hard-linked into place (exclusive create),
//! so readers never observe a partial file.
//!
//! Every change to the pid file, including stale reclaim and removal, happens
//! under an exclusive `flock` on the configuration directory. A check of the
//! current holder and the mutation that follows it are therefore never
//! interleaved with another synco process.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::NamedTempFile;

use crate::error::{lifecycle_io, LifecycleError};
use crate::paths::{pid_path, STOP_POLL_INTERVAL};

/// Held by a running daemon; removes the pid file on drop if it still names
/// the owner.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No lock, or a stale one (now removed).
    NotRunning,
    /// The daemon exited within the grace period.
    Stopped { pid: u32 },
    /// The grace period elapsed; the daemon was killed and its lock removed.
    Forced { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Absent,
    Running { pid: u32 },
    /// Lock present but its pid is dead or unreadable.
    Stale { pid: Option<u32> },
}

impl PidLock {
    /// Claim the lock in `dir` for the current process.
    ///
    /// Fails with [`LifecycleError::AlreadyRunning`] if a live process holds
    /// it; a stale lock is reclaimed.
    pub fn acquire(dir: &Path) -> Result<Self, LifecycleError> {
        Self::acquire_as(dir, std::process::id())
    }

    pub(crate) fn acquire_as(dir: &Path, pid: u32) -> Result<Self, LifecycleError> {
        let lock = pid_path(dir);
        let staged = stage_pid_file(dir, pid)?;
        let _dir_lock = lock_dir(dir)?;

        match fs::hard_link(staged.path(), &lock) {
            Ok(()) => return Ok(Self::claimed(lock, pid)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(lifecycle_io(&lock, err)),
        }

        match read_pid(&lock)? {
            Some(holder) if holder != pid && is_alive(holder)? => {
                tracing::info!(pid = holder, "refusing to start: existing daemon alive");
                return Err(LifecycleError::AlreadyRunning { pid: holder, lock });
            }
            holder => {
                tracing::warn!(
                    lock = %lock.display(),
                    stale_pid = ?holder,
                    "reclaiming stale pid lock",
                );
            }
        }

        remove_quietly(&lock)?;
        match fs::hard_link(staged.path(), &lock) {
            Ok(()) => Ok(Self::claimed(lock, pid)),
            // Only a writer that ignores the directory lock can get here.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(LifecycleError::LockContended { lock })
            }
            Err(err) => Err(lifecycle_io(&lock, err)),
        }
    }

    fn claimed(path: PathBuf, pid: u32) -> Self {
        tracing::info!(pid, lock = %path.display(), "acquired pid lock");
        Self { path, pid }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        match remove_if_owned(dir, self.pid) {
            Ok(true) => tracing::info!(lock = %self.path.display(), "released pid lock"),
            Ok(false) => tracing::warn!(
                lock = %self.path.display(),
                "pid lock no longer names this process; leaving it in place",
            ),
            Err(err) => tracing::warn!(
                lock = %self.path.display(),
                error = %err,
                "failed to remove pid lock",
            ),
        }
    }
}

/// Inspect the lock in `dir` without modifying it.
pub fn status(dir: &Path) -> Result<LockStatus, LifecycleError> {
    let lock = pid_path(dir);
    if !lock.exists() {
        return Ok(LockStatus::Absent);
    }
    match read_pid(&lock)? {
        Some(pid) if is_alive(pid)? => Ok(LockStatus::Running { pid }),
        pid => Ok(LockStatus::Stale { pid }),
    }
}

/// Stop the daemon holding the lock in `dir`: SIGTERM, wait up to `grace`
/// for it to exit or release the lock, then SIGKILL and remove the lock.
pub fn stop(dir: &Path, grace: Duration) -> Result<StopOutcome, LifecycleError> {
    let lock = pid_path(dir);
    if !lock.exists() {
        tracing::info!(lock = %lock.display(), "no pid lock; nothing to stop");
        return Ok(StopOutcome::NotRunning);
    }

    let pid = match read_pid(&lock)? {
        Some(pid) if is_alive(pid)? => pid,
        Some(pid) => {
            tracing::warn!(pid, "removing stale pid lock");
            remove_if_owned(dir, pid)?;
            return Ok(StopOutcome::NotRunning);
        }
        None => {
            tracing::warn!(lock = %lock.display(), "removing unreadable pid lock");
            remove_unreadable(dir)?;
            return Ok(StopOutcome::NotRunning);
        }
    };

    tracing::info!(pid, grace_ms = grace.as_millis() as u64, "sending SIGTERM to daemon");
    match kill(to_pid(pid), Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            remove_if_owned(dir, pid)?;
            return Ok(StopOutcome::Stopped { pid });
        }
        Err(source) => return Err(LifecycleError::Signal { pid, source }),
    }

    let deadline = Instant::now() + grace;
    loop {
        if read_pid(&lock)? != Some(pid) {
            tracing::info!(pid, "daemon released its lock");
            return Ok(StopOutcome::Stopped { pid });
        }
        if !is_alive(pid)? {
            remove_if_owned(dir, pid)?;
            tracing::info!(pid, "daemon exited");
            return Ok(StopOutcome::Stopped { pid });
        }
        if Instant::now() >= deadline {
            break;
        }
        sleep(STOP_POLL_INTERVAL);
    }

    tracing::warn!(pid, "grace period exceeded; sending SIGKILL");
    match kill(to_pid(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(source) => return Err(LifecycleError::Signal { pid, source }),
    }
    remove_if_owned(dir, pid)?;
    Ok(StopOutcome::Forced { pid })
}

/// `kill(pid, 0)` liveness check. EPERM means the process exists.
pub fn is_alive(pid: u32) -> Result<bool, LifecycleError> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Ok(false);
    }
    match kill(to_pid(pid), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(LifecycleError::Signal { pid, source }),
    }
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}

fn stage_pid_file(dir: &Path, pid: u32) -> Result<NamedTempFile, LifecycleError> {
    let mut staged = tempfile::Builder::new()
        .prefix(".synco.pid.")
        .tempfile_in(dir)
        .map_err(|err| lifecycle_io(dir, err))?;
    writeln!(staged, "{pid}").map_err(|err| lifecycle_io(staged.path(), err))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|err| lifecycle_io(staged.path(), err))?;
    Ok(staged)
}

/// `None` if the file is missing or does not hold a pid.
fn read_pid(path: &Path) -> Result<Option<u32>, LifecycleError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(lifecycle_io(path, err)),
    }
}

/// Exclusive `flock` on `dir`, released when the returned guard drops.
fn lock_dir(dir: &Path) -> Result<Flock<File>, LifecycleError> {
    let handle = File::open(dir).map_err(|err| lifecycle_io(dir, err))?;
    Flock::lock(handle, FlockArg::LockExclusive).map_err(|(_, source)| {
        LifecycleError::DirLock {
            dir: dir.to_path_buf(),
            source,
        }
    })
}

/// Remove the lock in `dir` only if it still names `pid`. Returns whether it
/// was removed (or was already gone).
fn remove_if_owned(dir: &Path, pid: u32) -> Result<bool, LifecycleError> {
    let path = pid_path(dir);
    let _dir_lock = lock_dir(dir)?;
    match read_pid(&path)? {
        Some(owner) if owner == pid => {
            remove_quietly(&path)?;
            Ok(true)
        }
        None if !path.exists() => Ok(true),
        _ => Ok(false),
    }
}

/// Remove the lock in `dir` if it still does not hold a pid.
fn remove_unreadable(dir: &Path) -> Result<(), LifecycleError> {
    let path = pid_path(dir);
    let _dir_lock = lock_dir(dir)?;
    if read_pid(&path)?.is_none() {
        remove_quietly(&path)?;
    }
    Ok(())
}

fn remove_quietly(path: &Path) -> Result<(), LifecycleError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(lifecycle_io(path, err)),
    }
}
