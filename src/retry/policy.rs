//! Retry policy: limits plus pluggable condition and backoff functions.

use std::fmt;
use std::sync::Arc;

use crate::response::HttpResponse;
use crate::retry::strategies;

/// Record of one physical HTTP attempt.
#[derive(Debug)]
pub struct AttemptRecord {
    /// Finalized response of this attempt (status 0 + error on transport
    /// failure).
    pub response: HttpResponse,
    /// Terminal transport error, if the attempt failed below HTTP.
    pub error: Option<curl::Error>,
    /// Wall time at which this attempt completed, seconds.
    pub complete_at: f64,
}

/// Attempt history handed to the retry condition and backoff functions.
#[derive(Debug, Default)]
pub struct RetryContext {
    /// Wall time at which the first attempt began, seconds.
    pub first_attempt_at: f64,
    /// All attempts so far, oldest first.
    pub attempts: Vec<AttemptRecord>,
}

impl RetryContext {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    /// Completion time of the most recent attempt; 0 when none finished yet.
    pub fn last_complete_at(&self) -> f64 {
        self.attempts.last().map(|a| a.complete_at).unwrap_or(0.0)
    }
}

/// Decides whether the last attempt warrants another try.
pub type RetryCondition = Arc<dyn Fn(&RetryContext) -> bool + Send + Sync>;

/// Returns the absolute wall-clock second at which to retry next.
pub type BackoffSchedule = Arc<dyn Fn(&RetryContext) -> f64 + Send + Sync>;

/// Retry behavior for one submission.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts, not counting the initial one.
    pub max_retries: u32,
    /// Overall budget in seconds from the first attempt; 0 disables.
    pub total_timeout: f64,
    pub should_retry: RetryCondition,
    pub next_retry_time: BackoffSchedule,
}

impl Default for RetryPolicy {
    /// Retries transient transport failures and the usual retryable HTTP
    /// statuses, with jittered exponential backoff.
    fn default() -> Self {
        Self {
            max_retries: 3,
            total_timeout: 0.0,
            should_retry: strategies::any_of(vec![
                strategies::transient_errors(),
                strategies::http_status(strategies::default_retryable_status_codes()),
            ]),
            next_retry_time: strategies::exponential_backoff(0.1, 30.0, 2.0, 0.3),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("total_timeout", &self.total_timeout)
            .finish()
    }
}
