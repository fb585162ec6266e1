//! Retry decisions for failed tasks.
//!
//! The default policy is a fixed delay of `task.retry_delay_ms` between
//! attempts. Exponential back-off is opt-in via [`RetryPolicy::Exponential`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Every retry waits `task.retry_delay_ms`.
    #[default]
    Fixed,
    /// Retry `n` waits `retry_delay_ms * multiplier^n`, capped at `max_delay_ms`.
    Exponential { multiplier: f64, max_delay_ms: u64 },
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self::Exponential {
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }

    /// Delay before the task's next attempt.
    pub fn compute_retry_delay(&self, task: &Task) -> Duration {
        let base = task.retry_delay_ms;
        match *self {
            Self::Fixed => Duration::from_millis(base),
            Self::Exponential { multiplier, max_delay_ms } => {
                let exponent = i32::try_from(task.retry_count).unwrap_or(i32::MAX);
                let factor = multiplier.max(1.0).powi(exponent);
                let ms = (base as f64 * factor).min(max_delay_ms as f64);
                Duration::from_millis(ms as u64)
            }
        }
    }
}

/// True iff the task still has retries left.
pub fn should_retry(task: &Task) -> bool {
    task.retry_count < task.max_retries
}

/// Fixed-delay shorthand for [`RetryPolicy::compute_retry_delay`].
pub fn compute_retry_delay(task: &Task) -> Duration {
    RetryPolicy::Fixed.compute_retry_delay(task)
}

/// Put a failed task back into `pending`, not eligible before `now + delay`.
pub fn schedule_retry(task: &mut Task, delay: Duration, now: DateTime<Utc>) {
    task.retry_count += 1;
    task.status = TaskStatus::Pending;
    task.error = None;
    task.result = None;
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    task.next_retry_at = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskDefinition;

    fn task(max_retries: u32, delay_ms: u64) -> Task {
        Task::from_definition(TaskDefinition::new("t", "http").with_retries(max_retries, delay_ms), 0, 0)
    }

    #[test]
    fn should_retry_within_limit() {
        let mut t = task(2, 10);
        assert!(should_retry(&t));
        t.retry_count = 1;
        assert!(should_retry(&t));
        t.retry_count = 2;
        assert!(!should_retry(&t));
    }

    #[test]
    fn zero_max_retries_never_retries() {
        assert!(!should_retry(&task(0, 10)));
    }

    #[test]
    fn fixed_delay_ignores_retry_count() {
        let mut t = task(5, 250);
        assert_eq!(compute_retry_delay(&t), Duration::from_millis(250));
        t.retry_count = 4;
        assert_eq!(compute_retry_delay(&t), Duration::from_millis(250));
    }

    #[test]
    fn exponential_delay_grows_and_caps() {
        let policy = RetryPolicy::Exponential {
            multiplier: 2.0,
            max_delay_ms: 1_000,
        };
        let mut t = task(10, 100);
        assert_eq!(policy.compute_retry_delay(&t), Duration::from_millis(100));
        t.retry_count = 2;
        assert_eq!(policy.compute_retry_delay(&t), Duration::from_millis(400));
        t.retry_count = 8;
        assert_eq!(policy.compute_retry_delay(&t), Duration::from_millis(1_000));
    }

    #[test]
    fn exponential_delay_stays_capped_for_huge_retry_counts() {
        let policy = RetryPolicy::exponential();
        let mut t = task(u32::MAX, 100);
        t.retry_count = u32::MAX - 1;
        assert_eq!(policy.compute_retry_delay(&t), Duration::from_millis(60_000));
    }

    #[test]
    fn schedule_retry_resets_to_pending_with_deadline() {
        let mut t = task(2, 0);
        let now = Utc::now();
        t.mark_failed("boom", now);

        schedule_retry(&mut t, Duration::from_millis(300), now);

        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 1);
        assert!(t.error.is_none());
        assert_eq!(t.next_retry_at, Some(now + chrono::Duration::milliseconds(300)));
        assert!(t.awaiting_retry(now));
    }

    #[test]
    fn policy_deserialises_from_tagged_json() {
        let p: RetryPolicy = serde_json::from_str(r#"{"kind":"fixed"}"#).unwrap();
        assert_eq!(p, RetryPolicy::Fixed);
        let p: RetryPolicy =
            serde_json::from_str(r#"{"kind":"exponential","multiplier":3.0,"max_delay_ms":10}"#).unwrap();
        assert!(matches!(p, RetryPolicy::Exponential { max_delay_ms: 10, .. }));
    }
}
