//! Size-based rotation of `synco.log`, the file the launch wrapper redirects
//! daemon output into.
//!
//! Keeps at most [`MAX_ROTATED_FILES`] copies:
//!   synco.log → synco.log.1 → synco.log.2 → … → synco.log.5
//!
//! The live log is copied and then truncated in place rather than renamed.
//! The daemon's stderr stays an `O_APPEND` descriptor on the same inode, so
//! after truncation new output lands at the start of `synco.log` again.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;

use crate::paths::{log_path, DAEMON_LOG, LOG_ROTATION_PERIOD};

/// Rotate once the live log reaches 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log` if it has reached `max_bytes`. Returns whether it rotated.
///
/// A missing log is not an error. After rotation `log` is the same file,
/// truncated to zero. Bytes written between the copy and the truncate are
/// lost.
pub fn rotate_if_needed(log: &Path, max_bytes: u64, keep: usize) -> io::Result<bool> {
    let size = match fs::metadata(log) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    match fs::remove_file(numbered(log, keep)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    for n in (1..keep).rev() {
        let from = numbered(log, n);
        if from.exists() {
            fs::rename(&from, numbered(log, n + 1))?;
        }
    }
    fs::copy(log, numbered(log, 1))?;
    fs::OpenOptions::new().write(true).open(log)?.set_len(0)?;
    Ok(true)
}

/// Rotate `synco.log` in `config_dir`. Failures are logged, never raised.
pub fn rotate_daemon_log(config_dir: &Path) {
    let log = log_path(config_dir);
    match rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log.display(), "log file rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log.display(), error = %err, "log rotation failed"),
    }
}

/// Periodically rotate the daemon log until shutdown is broadcast.
pub(crate) async fn rotation_task(config_dir: PathBuf, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(LOG_ROTATION_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let dir = config_dir.clone();
                let _ = tokio::task::spawn_blocking(move || rotate_daemon_log(&dir)).await;
            }
        }
    }
}

fn numbered(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(DAEMON_LOG);
    base.with_file_name(format!("{name}.{n}"))
}
