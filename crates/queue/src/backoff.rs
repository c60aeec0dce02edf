//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

/// Delay schedule for re-establishing a broker connection or subscription.
///
/// Exponential: `base * 2^(attempt-1)`, capped at `max_delay`, then spread by
/// `±jitter` of the computed delay. The result never exceeds `max_delay`.
///
/// Retries are unbounded; `alert_after` only decides when failures are logged
/// at error level instead of warn.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
    /// Consecutive failures before escalating log level
    pub alert_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
            alert_after: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Same delay for every attempt, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
            ..Default::default()
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: jitter.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    pub fn with_alert_after(mut self, failures: u32) -> Self {
        self.alert_after = failures;
        self
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_sample(attempt, sample)
    }

    /// Deterministic form of [`Self::delay_for_attempt`]; `sample` is in `[-1, 1]`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        // Exponent is capped so the float never overflows for absurd attempt counts.
        let exp = 2_f64.powi((attempt - 1).min(32) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        let jitter = delay_ms * self.jitter.clamp(0.0, 1.0) * sample.clamp(-1.0, 1.0);

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms) as u64)
    }

    /// Whether a run of `failures` consecutive failures should alert.
    pub fn should_alert(&self, failures: u32) -> bool {
        failures >= self.alert_after
    }
}
