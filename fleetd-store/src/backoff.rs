//! Reconnection backoff for coordination-store consumers (§4.A: "exponential
//! backoff 1 s → 30 s capped; on resume, consumers re-list and re-subscribe").

use std::time::Duration;

const INITIAL: Duration = Duration::from_secs(1);
const MAX: Duration = Duration::from_secs(30);

/// Tracks the current backoff delay across repeated reconnect attempts.
/// Callers re-list and re-subscribe after every `next_delay()` wait, per the
/// store's re-list-on-reconnect contract (no gap-free assumption).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectBackoff {
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self { current: INITIAL }
    }
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Doubles the delay (capped at 30 s) and returns the delay to wait
    /// before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX);
        delay
    }

    /// Resets to the initial 1 s delay after a successful reconnect.
    pub fn reset(&mut self) {
        self.current = INITIAL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        let mut b = ReconnectBackoff::new();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), MAX);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = ReconnectBackoff::new();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }
}
