//! synco: periodic rclone sync daemon.
//!
//! # Usage
//!
//! ```text
//! synco [-c <config>]               run in the foreground until stopped
//! synco [-c <config>] --once        run every job once, then exit
//! synco [-c <config>] --stop        stop the daemon for this config
//! synco [-c <config>] --status      report whether a daemon holds the lock
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

#[derive(Parser, Debug)]
#[command(
    name = "synco",
    version,
    about = "Keep local directories in sync with rclone remotes on a schedule",
    long_about = None,
)]
struct Cli {
    /// Configuration file (default: ./synco.json, else the user config dir).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run each job's first cycle, retries included, then exit.
    #[arg(long, conflicts_with_all = ["stop", "status"])]
    once: bool,

    /// Stop the running daemon; exits 2 if it had to be killed.
    #[arg(long, conflicts_with = "status")]
    stop: bool,

    /// Report whether a daemon holds the lock for this configuration.
    #[arg(long)]
    status: bool,

    /// Do not write synco.pid.
    #[arg(long)]
    no_create_pid: bool,

    /// Emit log events as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Seconds `--stop` waits before killing (default: stopGraceSeconds).
    #[arg(long, value_name = "SECS", requires = "stop")]
    grace: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = commands::resolve_config_path(cli.config)?;
    if cli.stop {
        return commands::stop::run(&config, cli.grace);
    }
    if cli.status {
        return commands::status::run(&config);
    }
    commands::run::run(commands::run::RunArgs {
        config,
        once: cli.once,
        create_pid: !cli.no_create_pid,
        log_json: cli.log_json,
    })
}
