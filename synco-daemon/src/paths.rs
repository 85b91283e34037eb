//! Files synco keeps next to its configuration, and the daemon's fixed
//! polling periods.

use std::path::{Path, PathBuf};
use std::time::Duration;

use synco_core::config::PID_FILE_NAME;

pub const DAEMON_LOG: &str = "synco.log";

/// How often the log rotation task checks file sizes.
pub const LOG_ROTATION_PERIOD: Duration = Duration::from_secs(30);

/// Poll period while waiting for a stopped daemon to exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `<config_dir>/synco.pid`
pub fn pid_path(config_dir: &Path) -> PathBuf {
    config_dir.join(PID_FILE_NAME)
}

/// `<config_dir>/synco.log`, where the wrapper redirects daemon output.
pub fn log_path(config_dir: &Path) -> PathBuf {
    config_dir.join(DAEMON_LOG)
}
