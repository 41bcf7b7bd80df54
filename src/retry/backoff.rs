use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// Trait defining backoff behavior
pub trait Backoff: Send + Sync {
    /// Delay to wait before the retry following failed attempt `attempt` (1-based)
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with jitter
///
/// The delay starts at `initial_delay`, doubles with every failed attempt and
/// is capped at `max_delay`, both before and after jitter is applied.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter_factor: 0.1,
        }
    }

    /// Spread each delay by up to `factor` of itself in either direction
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.max_delay.as_millis() as f64;
        let capped = (self.initial_delay.as_millis() as f64 * 2f64.powi(exponent)).min(max_ms);

        let spread = capped * self.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        let delay_ms = (capped + jitter).clamp(0.0, max_ms);

        trace!(attempt = attempt, capped_ms = capped, delay_ms = delay_ms, "Backoff delay");
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_base() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
            .with_jitter(0.0);

        assert_eq!(backoff.next_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(2), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let max_delay = Duration::from_secs(1);
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), max_delay).with_jitter(0.5);

        for attempt in [5, 20, 64, u32::MAX] {
            let delay = backoff.next_delay(attempt);
            assert!(delay <= max_delay, "{delay:?} exceeded {max_delay:?}");
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5))
            .with_jitter(0.5);

        let delays: Vec<Duration> = (0..100).map(|_| backoff.next_delay(2)).collect();
        let unique: std::collections::HashSet<_> = delays.iter().collect();
        assert!(unique.len() > 1);

        for delay in delays {
            let ms = delay.as_millis() as f64;
            assert!((99.0..=300.0).contains(&ms), "{ms}ms outside 200ms ± 50%");
        }
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(1))
            .with_jitter(1.5);
        assert_eq!(backoff.jitter_factor, 1.0);

        let backoff = backoff.with_jitter(-0.5);
        assert_eq!(backoff.jitter_factor, 0.0);
    }
}
