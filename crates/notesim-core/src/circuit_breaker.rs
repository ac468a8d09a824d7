//! Consecutive-failure gate for the turn scheduling path.
//!
//! The breaker only counts. Deciding when a failure happened and when enough
//! time has passed to reset is left to the caller.

use notesim_proto::{Error, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    reset_timeout: Duration,
    failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            reset_timeout,
            failures: 0,
        }
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Fails with [`Error::CircuitOpen`] once the failure count reaches the threshold.
    pub fn check(&self) -> Result<()> {
        if self.is_open() {
            return Err(Error::CircuitOpen {
                failures: self.failures,
            });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn is_open(&self) -> bool {
        self.failures >= self.threshold
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_below_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(matches!(
            breaker.check(),
            Err(Error::CircuitOpen { failures: 3 })
        ));
    }

    #[test]
    fn test_stays_open_until_reset() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(breaker.check().is_err());
        assert!(breaker.check().is_err());

        breaker.reset();
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let breaker = CircuitBreaker::new(0, Duration::ZERO);
        assert_eq!(breaker.threshold(), 1);
        assert!(breaker.check().is_ok());
    }
}
