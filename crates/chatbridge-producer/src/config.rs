//! Producer runtime configuration.

use std::time::Duration;

use chatbridge_core::Config;
use chatbridge_core::config::ProducerConfig;

/// Settings for the producer's connection to the relay.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Relay WebSocket URL (e.g., "ws://127.0.0.1:8080").
    pub url: String,

    pub connect_timeout: Duration,

    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,

    /// How long a query may go without any notification before the driver
    /// reports an error to consumers.
    pub stall_timeout: Duration,
}

impl ProducerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.client.url.clone(),
            connect_timeout: Duration::from_secs(config.client.connect_timeout_secs),
            reconnect: ReconnectPolicy::from_config(&config.producer),
            stall_timeout: Duration::from_secs(config.producer.stall_timeout_secs),
        }
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Backoff reconnection policy.
///
/// With `max_delay == initial_delay` the backoff is fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier applied to delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum number of reconnect attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

impl ReconnectPolicy {
    /// Same delay before every attempt, retrying forever.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    pub fn from_config(config: &ProducerConfig) -> Self {
        let initial = Duration::from_millis(config.reconnect_delay_ms);
        let max = Duration::from_millis(config.reconnect_max_delay_ms).max(initial);
        Self {
            initial_delay: initial,
            max_delay: max,
            multiplier: if max > initial { 2.0 } else { 1.0 },
            max_attempts: None,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}
