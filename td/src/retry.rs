//! Retry policy
//!
//! Pure decisions shared by the executor (inline retry) and the recovery
//! coordinator (durable retry, escalation, stuck detection).

use std::time::Duration;

use crate::domain::TaskStatus;

/// What the failed-task sweep should do with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to PENDING with `retry_count + 1`
    Retry,
    /// Retries exhausted; mark PERMANENTLY_FAILED
    Escalate,
    /// Retry delay has not elapsed yet
    Wait,
    /// Not a failed task
    Ignore,
}

/// Decide the fate of a task seen by the failed-task sweep
pub fn decide(
    status: TaskStatus,
    retry_count: u32,
    max_retries: u32,
    elapsed: Duration,
    retry_delay: Duration,
) -> RetryDecision {
    if status != TaskStatus::Failed {
        return RetryDecision::Ignore;
    }
    if retry_count >= max_retries {
        RetryDecision::Escalate
    } else if elapsed >= retry_delay {
        RetryDecision::Retry
    } else {
        RetryDecision::Wait
    }
}

/// Inline backoff: `min(base * 2^retry_count, cap)`
pub fn backoff_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// Whether the executor may re-invoke within the current dispatch
pub fn should_retry_inline(retry_count: u32, max_retries: u32, inline_used: u32, inline_limit: u32) -> bool {
    retry_count < max_retries && inline_used < inline_limit
}

/// Whether a failure at this retry count publishes TASK_FAILED
///
/// The last allowed attempt stays quiet; its outcome is announced by
/// TASK_PERMANENTLY_FAILED instead.
pub fn announces_failure(retry_count: u32, max_retries: u32) -> bool {
    retry_count < max_retries
}

/// Whether a busy task has gone quiet for too long
pub fn is_stuck(status: TaskStatus, elapsed: Duration, task_timeout: Duration) -> bool {
    status.is_busy() && elapsed >= task_timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn test_decide() {
        assert_eq!(decide(TaskStatus::Failed, 0, 3, MIN, MIN), RetryDecision::Retry);
        assert_eq!(decide(TaskStatus::Failed, 0, 3, MIN / 2, MIN), RetryDecision::Wait);
        assert_eq!(decide(TaskStatus::Failed, 3, 3, Duration::ZERO, MIN), RetryDecision::Escalate);
        assert_eq!(decide(TaskStatus::Failed, 0, 0, MIN, MIN), RetryDecision::Escalate);
        assert_eq!(decide(TaskStatus::Running, 0, 3, MIN, MIN), RetryDecision::Ignore);
        assert_eq!(decide(TaskStatus::PermanentlyFailed, 3, 3, MIN, MIN), RetryDecision::Ignore);
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(0, base, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(5, base, cap), Duration::from_secs(32));
        assert_eq!(backoff_delay(6, base, cap), cap);
        assert_eq!(backoff_delay(200, base, cap), cap);
    }

    #[test]
    fn test_inline_budget() {
        assert!(should_retry_inline(0, 2, 0, 1));
        assert!(!should_retry_inline(0, 2, 1, 1));
        assert!(!should_retry_inline(2, 2, 0, 1));
        assert!(!should_retry_inline(0, 2, 0, 0));
    }

    #[test]
    fn test_announces_failure() {
        assert!(announces_failure(0, 2));
        assert!(announces_failure(1, 2));
        assert!(!announces_failure(2, 2));
    }

    #[test]
    fn test_is_stuck() {
        let timeout = Duration::from_secs(600);
        assert!(is_stuck(TaskStatus::Running, timeout, timeout));
        assert!(is_stuck(TaskStatus::AwaitingResponse, timeout * 2, timeout));
        assert!(!is_stuck(TaskStatus::Running, timeout / 2, timeout));
        assert!(!is_stuck(TaskStatus::Pending, timeout * 2, timeout));
    }
}
