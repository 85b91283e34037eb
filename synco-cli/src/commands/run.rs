//! Foreground daemon and `--once`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;

use synco_core::ConfigError;
use synco_daemon::{start_blocking, DaemonError, DaemonOptions, LifecycleError, ScheduleMode};

pub struct RunArgs {
    pub config: PathBuf,
    pub once: bool,
    pub create_pid: bool,
    pub log_json: bool,
}

pub fn run(args: RunArgs) -> Result<ExitCode> {
    let options = DaemonOptions {
        config_path: args.config,
        mode: if args.once {
            ScheduleMode::Once
        } else {
            ScheduleMode::Continuous
        },
        create_pid: args.create_pid,
        log_json: args.log_json,
    };

    match start_blocking(&options) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(DaemonError::Config(err)) => {
            print_config_error(&err);
            Ok(ExitCode::FAILURE)
        }
        Err(DaemonError::Lifecycle(err @ LifecycleError::AlreadyRunning { .. })) => {
            eprintln!("{} {err}", "error:".red().bold());
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err).context("daemon exited with error"),
    }
}

fn print_config_error(err: &ConfigError) {
    match err {
        ConfigError::Invalid { path, violations } => {
            eprintln!(
                "{} invalid configuration {}:",
                "error:".red().bold(),
                path.display()
            );
            for violation in violations {
                eprintln!("  {} {violation}", "-".dimmed());
            }
        }
        other => eprintln!("{} {other}", "error:".red().bold()),
    }
}
