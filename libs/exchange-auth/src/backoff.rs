use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Cap for computed backoff, whatever the configuration says.
const MAX_BACKOFF_SECS: f64 = 300.0;

/// Exponential backoff between token acquisition attempts.
///
/// Delay for attempt `n` (0-based) is `min(initial * multiplier^n, max)`,
/// plus up to 25% random jitter when enabled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    #[serde(with = "exchange_http::humantime_serde")]
    pub initial: Duration,
    #[serde(with = "exchange_http::humantime_serde")]
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// 1ms initial, 20ms max, no jitter.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Delay before retrying after attempt `attempt` failed.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let max_secs = self.max.as_secs_f64().min(MAX_BACKOFF_SECS);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * multiplier.powi(exponent);
        let clamped = if base.is_finite() {
            base.min(max_secs).max(0.0)
        } else {
            max_secs
        };
        let duration = Duration::from_secs_f64(clamped);

        let duration = if self.jitter {
            let factor = rand::rng().random_range(0.0..=0.25);
            duration + duration.mul_f64(factor)
        } else {
            duration
        };
        duration.min(Duration::from_secs_f64(max_secs))
    }
}
