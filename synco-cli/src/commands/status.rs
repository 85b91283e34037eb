//! `synco --status`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;

use synco_core::config;
use synco_daemon::paths::pid_path;
use synco_daemon::{status, LockStatus};

pub fn run(config_path: &Path) -> Result<ExitCode> {
    let dir = config::config_dir(config_path);
    let lock = pid_path(&dir);
    let state = status(&dir).with_context(|| format!("failed to read {}", lock.display()))?;

    match state {
        LockStatus::Running { pid } => {
            println!("{} synco is running (pid {pid})", "running".green().bold());
            Ok(ExitCode::SUCCESS)
        }
        LockStatus::Stale { pid } => {
            let pid = pid.map_or_else(|| "unreadable".to_string(), |p| p.to_string());
            println!(
                "{} stale lock {} (pid {pid})",
                "stopped".yellow().bold(),
                lock.display()
            );
            Ok(ExitCode::FAILURE)
        }
        LockStatus::Absent => {
            println!("{} synco is not running", "stopped".dimmed());
            Ok(ExitCode::FAILURE)
        }
    }
}
