//! Bounded exponential backoff inside one scheduling cycle.

use std::time::Duration;

use synco_core::SyncJob;

use crate::record::{RunOutcome, RunRecord};

/// What the scheduler should do after a run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
    /// Upper bound on any single delay.
    pub cap: Duration,
}

impl RetryPolicy {
    /// Policy for `job`: its retry settings, delays capped at its interval.
    pub fn for_job(job: &SyncJob) -> Self {
        Self {
            base_delay: job.retry.base_delay,
            max_retries: job.retry.max_retries,
            cap: job.interval,
        }
    }

    /// `prior_attempts` counts retries already made in the current cycle.
    pub fn decide(&self, record: &RunRecord, prior_attempts: u32) -> RetryDecision {
        match record.outcome {
            RunOutcome::Success | RunOutcome::FatalFailure | RunOutcome::Cancelled => {
                RetryDecision::GiveUp
            }
            RunOutcome::TransientFailure | RunOutcome::Timeout => {
                if prior_attempts >= self.max_retries {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::RetryAfter(self.delay(prior_attempts))
                }
            }
        }
    }

    /// `base × 2^attempt`, saturating, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.cap)
    }

    /// True when `outcome` would have been retried had attempts remained.
    pub fn is_retryable(outcome: RunOutcome) -> bool {
        matches!(outcome, RunOutcome::TransientFailure | RunOutcome::Timeout)
    }
}
