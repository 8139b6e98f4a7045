//! Ready-made retry conditions and backoff schedules.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::retry::policy::{BackoffSchedule, RetryCondition, RetryContext};
use crate::util::jitter;

/// Retry when the last attempt died on a transient transport failure:
/// DNS, connect, timeout, TLS handshake, send/recv, or an empty response.
pub fn transient_errors() -> RetryCondition {
    Arc::new(|ctx: &RetryContext| {
        let Some(last) = ctx.last_attempt() else {
            return false;
        };
        match &last.error {
            Some(e) => {
                e.is_couldnt_resolve_host()
                    || e.is_couldnt_connect()
                    || e.is_operation_timedout()
                    || e.is_ssl_connect_error()
                    || e.is_send_error()
                    || e.is_recv_error()
                    || e.is_got_nothing()
            }
            None => false,
        }
    })
}

/// Statuses worth retrying by default: throttling and transient 5xx.
pub fn default_retryable_status_codes() -> BTreeSet<u32> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

/// Retry when the last status is in `codes`.
pub fn http_status(codes: impl IntoIterator<Item = u32>) -> RetryCondition {
    let codes: BTreeSet<u32> = codes.into_iter().collect();
    Arc::new(move |ctx: &RetryContext| {
        ctx.last_attempt()
            .map(|a| codes.contains(&a.response.status))
            .unwrap_or(false)
    })
}

/// Short-circuit OR over conditions. Empty input never retries.
pub fn any_of(conditions: Vec<RetryCondition>) -> RetryCondition {
    Arc::new(move |ctx: &RetryContext| conditions.iter().any(|c| c(ctx)))
}

/// Short-circuit AND over conditions. Empty input always retries.
pub fn all_of(conditions: Vec<RetryCondition>) -> RetryCondition {
    Arc::new(move |ctx: &RetryContext| conditions.iter().all(|c| c(ctx)))
}

/// `delay = min(base * multiplier^retries, max)`, plus a signed jitter of up
/// to `delay * jitter_factor`, floored at zero. Anchored on the last
/// attempt's completion time.
pub fn exponential_backoff(
    base: f64,
    max: f64,
    multiplier: f64,
    jitter_factor: f64,
) -> BackoffSchedule {
    Arc::new(move |ctx: &RetryContext| {
        let retries = ctx.attempt_count().saturating_sub(1);
        let mut delay = (base * multiplier.powi(retries as i32)).min(max);
        if jitter_factor > 0.0 {
            delay = (delay + jitter(delay * jitter_factor)).max(0.0);
        }
        ctx.last_complete_at() + delay
    })
}

/// `delay = min(initial + increment * retries, max)`.
pub fn linear_backoff(initial: f64, increment: f64, max: f64) -> BackoffSchedule {
    Arc::new(move |ctx: &RetryContext| {
        let retries = ctx.attempt_count().saturating_sub(1);
        let delay = (initial + increment * retries as f64).min(max);
        ctx.last_complete_at() + delay
    })
}

/// Constant delay between attempts.
pub fn fixed_delay(delay: f64) -> BackoffSchedule {
    Arc::new(move |ctx: &RetryContext| ctx.last_complete_at() + delay)
}

/// Retry as soon as the scheduler gets to it.
pub fn immediate() -> BackoffSchedule {
    Arc::new(|ctx: &RetryContext| ctx.last_complete_at())
}
