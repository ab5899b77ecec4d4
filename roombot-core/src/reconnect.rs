// ABOUTME: Linear backoff bookkeeping for the room reconnect loop.
// ABOUTME: Waits 5s, 10s, 15s... capped at 60s, and gives up after a fixed attempt ceiling.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest configurable wait between two connection attempts
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(3600);

/// Backoff configuration for room reconnection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Added to the delay after each failed attempt
    #[serde(with = "secs", default = "default_step")]
    pub step: Duration,
    /// Maximum delay between attempts
    #[serde(with = "secs", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Attempts before the room is abandoned (a bit over a day at max delay)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_step() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    1500
}

impl BackoffConfig {
    /// Requires `0 < step <= max_delay <= MAX_RECONNECT_DELAY` and at least one attempt
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("reconnect.max_attempts must be at least 1");
        }
        if self.step.is_zero() {
            anyhow::bail!("reconnect.step must be at least 1 second");
        }
        if self.max_delay > MAX_RECONNECT_DELAY {
            anyhow::bail!(
                "reconnect.max_delay ({}s) must be at most {}s",
                self.max_delay.as_secs(),
                MAX_RECONNECT_DELAY.as_secs()
            );
        }
        if self.step > self.max_delay {
            anyhow::bail!(
                "reconnect.step ({}s) must not exceed reconnect.max_delay ({}s)",
                self.step.as_secs(),
                self.max_delay.as_secs()
            );
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Tracks reconnection attempts for one room
#[derive(Debug)]
pub struct BackoffState {
    config: BackoffConfig,
    attempts: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Count a connection attempt; false once the ceiling is reached
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempts >= self.config.max_attempts {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Delay before the next attempt after the current one failed
    pub fn delay(&self) -> Duration {
        self.config
            .step
            .checked_mul(self.attempts)
            .map_or(self.config.max_delay, |d| d.min(self.config.max_delay))
    }

    /// Number of attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.step, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 1500);
    }

    #[test]
    fn test_linear_backoff_sequence() {
        let mut state = BackoffState::new(BackoffConfig::default());
        let mut delays = Vec::new();
        for _ in 0..14 {
            assert!(state.begin_attempt());
            delays.push(state.delay().as_secs());
        }
        assert_eq!(
            delays,
            vec![5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 60, 60]
        );
        assert_eq!(state.attempts(), 14);
    }

    #[test]
    fn test_delay_saturates_at_max_instead_of_overflowing() {
        let config = BackoffConfig {
            step: Duration::from_secs(u64::MAX / 2),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        };
        let mut state = BackoffState::new(config);
        state.begin_attempt();
        state.begin_attempt();
        state.begin_attempt();
        assert_eq!(state.delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_bounds() {
        BackoffConfig::default().validate().unwrap();
        let too_long = BackoffConfig {
            max_delay: MAX_RECONNECT_DELAY + Duration::from_secs(1),
            ..BackoffConfig::default()
        };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_attempt_ceiling() {
        let config = BackoffConfig {
            max_attempts: 3,
            ..BackoffConfig::default()
        };
        let mut state = BackoffState::new(config);

        assert!(state.begin_attempt());
        assert!(state.begin_attempt());
        assert!(state.begin_attempt());
        assert!(!state.begin_attempt());
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_config_from_toml_seconds() {
        let config: BackoffConfig = toml::from_str("step = 2\nmax_delay = 30").unwrap();
        assert_eq!(config.step, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 1500);
    }
}
