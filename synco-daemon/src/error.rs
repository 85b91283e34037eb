use std::path::PathBuf;

use thiserror::Error;

/// Failures of the pid-file start/stop protocol.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("synco is already running (pid {pid}, lock {lock})")]
    AlreadyRunning { pid: u32, lock: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("failed to lock directory {dir}: {source}")]
    DirLock {
        dir: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("lock {lock} changed owner while it was being claimed")]
    LockContended { lock: PathBuf },
}

/// Error surface for the daemon runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] synco_core::ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn lifecycle_io(path: impl Into<PathBuf>, source: std::io::Error) -> LifecycleError {
    LifecycleError::Io {
        path: path.into(),
        source,
    }
}
