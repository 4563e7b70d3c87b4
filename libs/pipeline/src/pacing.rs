use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

/// Fixed minimum gap between submissions. A zero interval never waits.
pub struct Pacer {
    interval: Option<Interval>,
}

impl Pacer {
    /// Must be called inside a tokio runtime.
    pub fn new(period: Duration) -> Self {
        let interval = (!period.is_zero()).then(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self { interval }
    }

    /// First call returns immediately.
    pub async fn tick(&mut self) {
        if let Some(interval) = self.interval.as_mut() {
            interval.tick().await;
        }
    }
}

/// Bounded exponential backoff: `initial * 2^attempt`, capped at `max`,
/// at most `max_retries` delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_retries: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_retries: u32) -> Self {
        Self { initial, max, max_retries, attempt: 0 }
    }

    /// Delay before the next retry, `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(self.initial.saturating_mul(factor).min(self.max))
    }

    /// Retries handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50), 5);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            [10, 20, 40, 50, 50].map(Duration::from_millis).to_vec()
        );
        assert_eq!(backoff.attempts(), 5);
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn zero_retries_never_waits() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 0);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn large_attempts_saturate() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 100);
        let last = std::iter::from_fn(|| backoff.next_delay()).last();
        assert_eq!(last, Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_ticks() {
        let mut pacer = Pacer::new(Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        pacer.tick().await;
        pacer.tick().await;
        pacer.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_unpaced() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = tokio::time::Instant::now();
        for _ in 0..10 {
            pacer.tick().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
