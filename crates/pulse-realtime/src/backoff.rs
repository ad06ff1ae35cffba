use std::time::Duration;

/// Reconnection bookkeeping. Only the connection manager mutates it:
/// `attempts` grows by one per scheduled retry and drops back to zero only
/// when a connection opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectState {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            base_delay,
            max_attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Claim the next attempt and return its delay, or `None` once
    /// `max_attempts` retries have been scheduled.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(backoff_delay(self.base_delay, self.attempts))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// `base * 2^(attempt-1)` for `attempt >= 1`, saturating rather than
/// overflowing on absurd attempt counts.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let base = Duration::from_millis(1_000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(base, 5), Duration::from_millis(16_000));
    }

    #[test]
    fn huge_attempt_saturates() {
        let d = backoff_delay(Duration::from_secs(1), 10_000);
        assert_eq!(d, Duration::from_secs(1 << 31));
    }

    #[test]
    fn next_delay_counts_up_to_max() {
        let mut state = ReconnectState::new(Duration::from_millis(100), 3);
        let delays: Vec<_> = std::iter::from_fn(|| state.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert!(state.is_exhausted());
        assert_eq!(state.attempts, 3);
        assert_eq!(state.next_delay(), None);
        assert_eq!(state.attempts, 3);
    }

    #[test]
    fn reset_clears_attempts() {
        let mut state = ReconnectState::new(Duration::from_millis(100), 2);
        state.next_delay();
        state.next_delay();
        assert!(state.is_exhausted());
        state.reset();
        assert_eq!(state.attempts, 0);
        assert_eq!(state.next_delay(), Some(Duration::from_millis(100)));
    }
}
