//! Exponential backoff with jitter (`spec.md` §4.4).
//!
//! Grounded on `executor.py::RetryManager`: pure functions over a job's
//! metadata and current attempt count, no shared state, no I/O.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;

use crate::job::JobMetadata;

/// Caps the computed delay so a single job's backoff can never dominate
/// the scheduler's tick granularity. Matches the 1-hour ceiling in
/// `executor.py::RetryManager.calculate_delay`.
const MAX_DELAY_SECONDS: u64 = 3600;

/// Stateless policy for whether and when to retry a failed attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryManager;

impl RetryManager {
    pub fn new() -> Self {
        Self
    }

    /// Whether `attempt` (1-indexed, the attempt that just failed) has
    /// exhausted `max_retries`.
    pub fn should_retry(&self, attempt: u32, max_retries: u32) -> bool {
        attempt <= max_retries
    }

    /// Exponential backoff from `metadata.retry_delay_seconds`, doubled per
    /// attempt past the first, with +/-20% jitter, capped at
    /// [`MAX_DELAY_SECONDS`].
    pub fn delay_seconds(&self, metadata: &JobMetadata, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = metadata.retry_delay_seconds.saturating_mul(1u64 << exponent);
        let capped = base.min(MAX_DELAY_SECONDS);

        let jitter_fraction = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = capped as f64 * (1.0 + jitter_fraction);
        jittered.max(0.0).round() as u64
    }

    /// Convenience wrapper returning the absolute retry-after instant.
    pub fn retry_after(&self, metadata: &JobMetadata, attempt: u32) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::seconds(self.delay_seconds(metadata, attempt) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;

    fn metadata() -> JobMetadata {
        let mut m = JobMetadata::new(JobType::get_or_create("test_retry_job"), "Test");
        m.retry_delay_seconds = 10;
        m.max_retries = 3;
        m
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let manager = RetryManager::new();
        assert!(manager.should_retry(1, 3));
        assert!(manager.should_retry(3, 3));
        assert!(!manager.should_retry(4, 3));
    }

    #[test]
    fn delay_grows_exponentially_within_jitter_band() {
        let manager = RetryManager::new();
        let metadata = metadata();

        let first = manager.delay_seconds(&metadata, 1);
        let second = manager.delay_seconds(&metadata, 2);

        assert!((8..=12).contains(&first), "first delay {first} out of band");
        assert!((16..=24).contains(&second), "second delay {second} out of band");
    }

    #[test]
    fn delay_is_capped() {
        let manager = RetryManager::new();
        let mut metadata = metadata();
        metadata.retry_delay_seconds = 10_000;

        let delay = manager.delay_seconds(&metadata, 10);
        assert!(delay <= MAX_DELAY_SECONDS + MAX_DELAY_SECONDS / 5);
    }
}
