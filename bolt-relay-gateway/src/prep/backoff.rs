//! Wait durations between readiness polls.

use std::time::Duration;

use bolt_relay_core::PreparationSettings;

/// Linear, capped backoff: poll `i` waits `base * (i + 1)`, never more than
/// `max_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_wait: Duration,
    max_attempts: u32,
    call_timeout: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;
    pub const DEFAULT_BASE: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

    /// `max_attempts` is clamped to at least one poll. The per-call
    /// deadline starts out equal to `max_wait`.
    pub fn new(base: Duration, max_wait: Duration, max_attempts: u32) -> Self {
        let max_wait = max_wait.max(base);
        Self {
            base,
            max_wait,
            max_attempts: max_attempts.max(1),
            call_timeout: max_wait,
        }
    }

    pub fn from_settings(settings: &PreparationSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.backoff_base_ms),
            Duration::from_millis(settings.backoff_max_ms),
            settings.max_attempts,
        )
        .with_call_timeout(Duration::from_millis(settings.call_timeout_ms))
    }

    /// Deadline for a single `begin` or `is_ready` call.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Wait after the poll numbered `attempt_index` (zero-based).
    pub fn wait(&self, attempt_index: u32) -> Duration {
        self.base
            .saturating_mul(attempt_index.saturating_add(1))
            .min(self.max_wait)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Total time spent sleeping when every poll comes back not ready.
    ///
    /// There is no sleep after the last poll.
    pub fn total_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|i| self.wait(i))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Longest a run can take: every sleep plus `begin` and every poll
    /// hitting its deadline.
    pub fn worst_case_run(&self) -> Duration {
        self.call_timeout
            .saturating_mul(self.max_attempts.saturating_add(1))
            .saturating_add(self.total_wait())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BASE,
            Self::DEFAULT_MAX_WAIT,
            Self::DEFAULT_MAX_ATTEMPTS,
        )
    }
}
