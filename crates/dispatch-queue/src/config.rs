//! Dispatch pacing configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DISPATCH_INTERVAL_MIN_SECS` | 45 | Shortest gap between two sends |
//! | `DISPATCH_INTERVAL_MAX_SECS` | 120 | Longest gap between two sends |
//! | `DISPATCH_BATCH_SIZE` | 20 | Successful sends between cooldowns |
//! | `DISPATCH_COOLDOWN_MIN_SECS` | 600 | Shortest cooldown |
//! | `DISPATCH_COOLDOWN_MAX_SECS` | 900 | Longest cooldown |
//! | `DISPATCH_TYPING_MIN_MS` | 3000 | Shortest composing indicator |
//! | `DISPATCH_TYPING_MAX_MS` | 5000 | Longest composing indicator |
//! | `DISPATCH_MAX_ATTEMPTS` | 3 | Attempts before an item is marked failed |
//! | `DISPATCH_SEND_TIMEOUT_SECS` | 30 | Bound on a single send call |
//! | `DISPATCH_SEED` | - | Fixed RNG seed (tests and replays) |

use std::str::FromStr;
use std::time::Duration;

use crate::error::QueueError;

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, QueueError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| QueueError::InvalidConfig { key, value }),
        Err(_) => Ok(default),
    }
}

/// Pacing, cooldown and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub interval_min: Duration,
    pub interval_max: Duration,
    /// Successful sends after which a cooldown replaces the next interval.
    pub batch_size: u32,
    pub cooldown_min: Duration,
    pub cooldown_max: Duration,
    pub typing_min: Duration,
    pub typing_max: Duration,
    pub max_attempts: u32,
    pub send_timeout: Duration,
    pub seed: Option<u64>,
    /// Vary the opening greeting of each message.
    pub vary_greetings: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_min: Duration::from_secs(45),
            interval_max: Duration::from_secs(120),
            batch_size: 20,
            cooldown_min: Duration::from_secs(10 * 60),
            cooldown_max: Duration::from_secs(15 * 60),
            typing_min: Duration::from_secs(3),
            typing_max: Duration::from_secs(5),
            max_attempts: 3,
            send_timeout: Duration::from_secs(30),
            seed: None,
            vary_greetings: true,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, QueueError> {
        let seed = match std::env::var("DISPATCH_SEED") {
            Ok(value) => Some(
                value
                    .trim()
                    .parse()
                    .map_err(|_| QueueError::InvalidConfig { key: "DISPATCH_SEED", value })?,
            ),
            Err(_) => None,
        };

        let config = Self {
            interval_min: Duration::from_secs(env_or("DISPATCH_INTERVAL_MIN_SECS", 45)?),
            interval_max: Duration::from_secs(env_or("DISPATCH_INTERVAL_MAX_SECS", 120)?),
            batch_size: env_or("DISPATCH_BATCH_SIZE", 20)?,
            cooldown_min: Duration::from_secs(env_or("DISPATCH_COOLDOWN_MIN_SECS", 600)?),
            cooldown_max: Duration::from_secs(env_or("DISPATCH_COOLDOWN_MAX_SECS", 900)?),
            typing_min: Duration::from_millis(env_or("DISPATCH_TYPING_MIN_MS", 3000)?),
            typing_max: Duration::from_millis(env_or("DISPATCH_TYPING_MAX_MS", 5000)?),
            max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", 3)?,
            send_timeout: Duration::from_secs(env_or("DISPATCH_SEND_TIMEOUT_SECS", 30)?),
            seed,
            vary_greetings: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// No pacing at all; for tests and local runs.
    pub fn immediate() -> Self {
        Self {
            interval_min: Duration::ZERO,
            interval_max: Duration::ZERO,
            cooldown_min: Duration::ZERO,
            cooldown_max: Duration::ZERO,
            typing_min: Duration::ZERO,
            typing_max: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        let ranges = [
            ("DISPATCH_INTERVAL_MIN_SECS", self.interval_min, self.interval_max),
            ("DISPATCH_COOLDOWN_MIN_SECS", self.cooldown_min, self.cooldown_max),
            ("DISPATCH_TYPING_MIN_MS", self.typing_min, self.typing_max),
        ];
        for (key, min, max) in ranges {
            if min > max {
                return Err(QueueError::InvalidConfig {
                    key,
                    value: format!("{min:?} > {max:?}"),
                });
            }
        }
        if self.typing_max > self.interval_min {
            return Err(QueueError::InvalidConfig {
                key: "DISPATCH_TYPING_MAX_MS",
                value: format!("{:?} exceeds the shortest interval", self.typing_max),
            });
        }
        if self.max_attempts == 0 || self.batch_size == 0 {
            return Err(QueueError::InvalidConfig {
                key: "DISPATCH_MAX_ATTEMPTS",
                value: "attempts and batch size must be positive".to_string(),
            });
        }
        Ok(())
    }
}
