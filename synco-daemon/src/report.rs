//! Sink for structured run outcomes.

use synco_core::JobName;

use crate::record::{RunOutcome, RunRecord};
use crate::retry::{RetryDecision, RetryPolicy};

/// Receives run lifecycle events from the scheduler. Implementations must be
/// cheap; they are called from the scheduling loop.
pub trait RunReporter: Send + Sync {
    fn run_started(&self, _job: &JobName, _attempt: u32) {}

    fn run_finished(&self, record: &RunRecord, decision: RetryDecision);

    /// A cadence tick fired while the job was still running or retrying.
    fn tick_skipped(&self, _job: &JobName) {}
}

/// Default reporter: one `tracing` event per run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn run_started(&self, job: &JobName, attempt: u32) {
        tracing::info!(job = %job, attempt, "sync run started");
    }

    fn run_finished(&self, record: &RunRecord, decision: RetryDecision) {
        let job = &record.job;
        let duration_ms = record.duration_ms();
        match (record.outcome, decision) {
            (RunOutcome::Success, _) => {
                tracing::info!(
                    job = %job,
                    attempt = record.attempt,
                    duration_ms,
                    "sync run succeeded",
                );
            }
            (RunOutcome::Cancelled, _) => {
                tracing::info!(job = %job, attempt = record.attempt, "sync run cancelled");
            }
            (outcome, RetryDecision::RetryAfter(delay)) => {
                tracing::warn!(
                    job = %job,
                    attempt = record.attempt,
                    outcome = %outcome,
                    exit_code = ?record.exit_code,
                    retry_in_ms = delay.as_millis() as u64,
                    "sync run failed; retrying",
                );
            }
            (outcome, RetryDecision::GiveUp) if RetryPolicy::is_retryable(outcome) => {
                tracing::error!(
                    job = %job,
                    attempt = record.attempt,
                    outcome = %outcome,
                    exit_code = ?record.exit_code,
                    stderr = %tail(&record.output.stderr),
                    "sync run failed; retries exhausted, waiting for next interval",
                );
            }
            (outcome, RetryDecision::GiveUp) => {
                tracing::error!(
                    job = %job,
                    attempt = record.attempt,
                    outcome = %outcome,
                    exit_code = ?record.exit_code,
                    stderr = %tail(&record.output.stderr),
                    "sync run failed fatally",
                );
            }
        }
    }

    fn tick_skipped(&self, job: &JobName) {
        tracing::debug!(job = %job, "interval tick skipped; previous run still in progress");
    }
}

/// Last few lines of captured output, for log events.
fn tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}
