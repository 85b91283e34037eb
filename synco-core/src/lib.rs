//! synco core library: job types, configuration loading, errors.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`ConfigError`] and [`Violation`]
//! - [`config`]: load / validate `synco.json`

pub mod config;
pub mod error;
pub mod types;

pub use error::{ConfigError, Violation};
pub use types::{
    Config, Direction, JobName, RetrySettings, Settings, SyncJob, TransferOptions,
};
