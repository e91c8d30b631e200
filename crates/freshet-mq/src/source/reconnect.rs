//! Reconnection backoff policy.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Tracks attempts within one outage and produces the delay before each.
///
/// Delays grow by the configured multiplier up to the cap, with optional
/// deterministic jitter so a fleet of sources does not retry in lockstep.
/// [`reset`](Self::reset) rearms the policy after a successful reconnect.
#[derive(Debug)]
pub(crate) struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
    current_delay: Duration,
}

impl ReconnectPolicy {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            current_delay,
        }
    }

    /// Returns the delay before the next attempt, or `None` when no further
    /// attempt is allowed (reconnection disabled, or the retry budget is
    /// spent; [`max_retries_exceeded`](Self::max_retries_exceeded) tells
    /// the two apart).
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn next_backoff(&mut self) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        if let Some(max) = self.config.max_retries {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt += 1;

        let base_ms = self.current_delay.as_millis() as f64;
        let delay = if self.config.jitter && base_ms > 0.0 {
            let spread = base_ms * 0.2;
            let offset = (f64::from(self.attempt) * 11.0) % (2.0 * spread) - spread;
            Duration::from_millis((base_ms + offset).max(1.0) as u64)
        } else {
            self.current_delay
        };

        let next_ms = (base_ms * self.config.backoff_multiplier)
            .min(self.config.max_delay.as_millis() as f64);
        self.current_delay = Duration::from_millis(next_ms as u64);
        Some(delay)
    }

    /// 1-based number of the attempt most recently produced.
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the policy stopped because the retry budget ran out.
    pub(crate) fn max_retries_exceeded(&self) -> bool {
        self.config
            .max_retries
            .is_some_and(|max| self.attempt >= max)
    }

    /// Rearms the policy after a successful reconnect.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }
}
