//! Time windows and confidence thresholds.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RESCHEDULE_WINDOW_HOURS` | 72 | Max age of a reschedule request or cancellation that may be linked |
//! | `ANTI_LOOP_TTL_HOURS` | 48 | Lifetime of the "just rescheduled" marker |
//! | `CONTEXT_TTL_DAYS` | 7 | Inactivity after which a conversation context is dropped |
//! | `CONFIDENCE_AUTO` | 0.75 | Minimum confidence for automatic processing |
//! | `CONFIDENCE_CONFIRM` | 0.55 | Minimum confidence for a "did you mean" prompt |
//! | `MAX_FALLBACKS` | 3 | Consecutive failed attempts before the sign-off message |

use std::str::FromStr;

use chrono::Duration;

use crate::error::CoreError;
use crate::flow::ConfidenceBand;

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidConfig { key, value }),
        Err(_) => Ok(default),
    }
}

/// Time windows used by the store and the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindows {
    pub reschedule_window: Duration,
    pub anti_loop_ttl: Duration,
    pub context_ttl: Duration,
}

impl Default for TimeWindows {
    fn default() -> Self {
        Self {
            reschedule_window: Duration::hours(72),
            anti_loop_ttl: Duration::hours(48),
            context_ttl: Duration::days(7),
        }
    }
}

impl TimeWindows {
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            reschedule_window: Duration::hours(env_or("RESCHEDULE_WINDOW_HOURS", 72)?),
            anti_loop_ttl: Duration::hours(env_or("ANTI_LOOP_TTL_HOURS", 48)?),
            context_ttl: Duration::days(env_or("CONTEXT_TTL_DAYS", 7)?),
        })
    }
}

/// Confidence routing thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceThresholds {
    /// `confidence >= auto_process` acts on the reply.
    pub auto_process: f64,
    /// `confirm <= confidence < auto_process` asks the patient to confirm.
    pub confirm: f64,
    /// Consecutive failed attempts that trigger the sign-off.
    pub max_fallbacks: u32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            auto_process: 0.75,
            confirm: 0.55,
            max_fallbacks: 3,
        }
    }
}

impl ConfidenceThresholds {
    pub fn from_env() -> Result<Self, CoreError> {
        let thresholds = Self {
            auto_process: env_or("CONFIDENCE_AUTO", 0.75)?,
            confirm: env_or("CONFIDENCE_CONFIRM", 0.55)?,
            max_fallbacks: env_or("MAX_FALLBACKS", 3)?,
        };

        if !(0.0..=1.0).contains(&thresholds.confirm)
            || !(0.0..=1.0).contains(&thresholds.auto_process)
            || thresholds.confirm > thresholds.auto_process
        {
            return Err(CoreError::InvalidConfig {
                key: "CONFIDENCE_CONFIRM",
                value: format!("{} > {}", thresholds.confirm, thresholds.auto_process),
            });
        }

        Ok(thresholds)
    }

    pub fn band(&self, confidence: f64) -> ConfidenceBand {
        if confidence >= self.auto_process {
            ConfidenceBand::High
        } else if confidence >= self.confirm {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}
