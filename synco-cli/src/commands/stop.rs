//! `synco --stop`.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;

use synco_core::{config, Settings};
use synco_daemon::{stop, StopOutcome};

/// Exit code when the daemon ignored SIGTERM and had to be killed.
const FORCED_EXIT: u8 = 2;

pub fn run(config_path: &Path, grace: Option<u64>) -> Result<ExitCode> {
    let dir = config::config_dir(config_path);
    let grace = match grace {
        Some(secs) => Duration::from_secs(secs),
        // A broken config must not prevent stopping a daemon started from
        // an earlier, valid one.
        None => config::load(config_path)
            .map(|c| c.settings.stop_grace)
            .unwrap_or_else(|_| Settings::default().stop_grace),
    };

    let outcome = stop(&dir, grace)
        .with_context(|| format!("failed to stop synco in {}", dir.display()))?;
    match outcome {
        StopOutcome::NotRunning => {
            eprintln!("{} synco is not running", "error:".red().bold());
            Ok(ExitCode::FAILURE)
        }
        StopOutcome::Stopped { pid } => {
            println!("{} synco stopped (pid {pid})", "ok:".green().bold());
            Ok(ExitCode::SUCCESS)
        }
        StopOutcome::Forced { pid } => {
            println!(
                "{} synco did not exit within {}s; killed pid {pid}",
                "warning:".yellow().bold(),
                grace.as_secs()
            );
            Ok(ExitCode::from(FORCED_EXIT))
        }
    }
}
