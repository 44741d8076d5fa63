//! Bounded retry policy for queued records.

use chrono::{DateTime, Duration, Utc};

/// Exponential backoff with an attempt ceiling.
///
/// After `max_attempts` failed deliveries a record is dead-lettered instead of
/// being retried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 8,
      base_delay: Duration::seconds(30),
      max_delay: Duration::hours(1),
    }
  }
}

impl RetryPolicy {
  /// Delay before the next attempt, given how many attempts have failed.
  pub fn delay_after(&self, attempts: u32) -> Duration {
    if attempts == 0 {
      return Duration::zero();
    }
    // 2^30 already exceeds any sane cap, stop doubling there.
    let factor = 1i32 << (attempts - 1).min(30);
    self
      .base_delay
      .checked_mul(factor)
      .map(|d| d.min(self.max_delay))
      .unwrap_or(self.max_delay)
  }

  /// When a record that has failed `attempts` times may be tried again,
  /// or `None` if it is out of attempts. A retry time past the end of the
  /// calendar also counts as out of attempts.
  pub fn next_attempt(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if attempts >= self.max_attempts {
      return None;
    }
    now.checked_add_signed(self.delay_after(attempts))
  }
}
