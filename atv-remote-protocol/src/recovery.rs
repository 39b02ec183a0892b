//! Auto-Recovery
//!
//! Exponential backoff used by the control session to recover a dropped
//! connection without operator intervention.

use std::time::Duration;

/// Initial reconnection delay
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Maximum reconnection delay
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Reconnection tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    pub max_delay: Duration,
    /// Give up after this many attempts; `None` keeps retrying at `max_delay`
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

/// Reconnection strategy with exponential backoff
#[derive(Debug, Clone)]
pub struct ReconnectionStrategy {
    /// Current reconnection attempt number
    pub attempt: u32,
    /// Maximum number of attempts
    pub max_attempts: Option<u32>,
    /// Delay for the next attempt
    pub current_delay: Duration,
    /// Delay for the first attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for ReconnectionStrategy {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default())
    }
}

impl ReconnectionStrategy {
    /// Create a new reconnection strategy
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current_delay: config.initial_delay,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
        }
    }

    /// Reset the strategy after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.initial_delay;
    }

    /// Check if more attempts are available
    pub fn has_attempts_remaining(&self) -> bool {
        self.max_attempts.map_or(true, |max| self.attempt < max)
    }

    /// Get next delay with exponential backoff
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.has_attempts_remaining() {
            return None;
        }

        let delay = self.current_delay;
        self.attempt = self.attempt.saturating_add(1);
        self.current_delay = std::cmp::min(self.current_delay.saturating_mul(2), self.max_delay);

        Some(delay)
    }

    /// Get human-readable status
    pub fn status(&self) -> String {
        match self.max_attempts {
            Some(max) => format!(
                "Attempt {}/{}, next delay: {:?}",
                self.attempt, max, self.current_delay
            ),
            None => format!(
                "Attempt {}, next delay: {:?}",
                self.attempt, self.current_delay
            ),
        }
    }
}
