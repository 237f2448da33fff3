//! Configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Server bind address.
    pub addr: SocketAddr,
    /// SQLite database URL.
    pub database_url: String,
    /// Bound on one inbound pipeline pass.
    pub pass_timeout: Duration,
    /// Bound on one classification.
    pub classifier_timeout: Duration,
    /// Inbound passes running at the same time.
    pub max_concurrent: usize,
    /// Inbound messages buffered between the webhook and the processor.
    pub inbound_buffer: usize,
    /// How often inactive conversation contexts are pruned.
    pub gc_interval: Duration,
    /// Emit JSON log lines.
    pub json_logs: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8790)),
            database_url: "sqlite:replies.db?mode=rwc".to_string(),
            pass_timeout: Duration::from_secs(30),
            classifier_timeout: Duration::from_secs(10),
            max_concurrent: 8,
            inbound_buffer: 256,
            gc_interval: Duration::from_secs(60 * 60),
            json_logs: false,
        }
    }
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `REPLY_DAEMON_ADDR` | Server bind address | `127.0.0.1:8790` |
    /// | `SQLITE_PATH` | SQLite database URL | `sqlite:replies.db?mode=rwc` |
    /// | `PIPELINE_TIMEOUT_SECS` | Bound on one inbound pass | `30` |
    /// | `CLASSIFIER_TIMEOUT_SECS` | Bound on one classification | `10` |
    /// | `PIPELINE_MAX_CONCURRENT` | Concurrent inbound passes | `8` |
    /// | `INBOUND_BUFFER` | Buffered inbound messages | `256` |
    /// | `CONTEXT_GC_INTERVAL_SECS` | Context pruning interval | `3600` |
    /// | `LOG_FORMAT` | `json` for JSON logs | text |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let addr = parsed("REPLY_DAEMON_ADDR", defaults.addr)?;
        let database_url = env::var("SQLITE_PATH").unwrap_or(defaults.database_url);
        let pass_timeout = Duration::from_secs(parsed("PIPELINE_TIMEOUT_SECS", 30)?);
        let classifier_timeout = Duration::from_secs(parsed("CLASSIFIER_TIMEOUT_SECS", 10)?);
        let max_concurrent = parsed("PIPELINE_MAX_CONCURRENT", defaults.max_concurrent)?;
        let inbound_buffer = parsed("INBOUND_BUFFER", defaults.inbound_buffer)?;
        let gc_interval = Duration::from_secs(parsed("CONTEXT_GC_INTERVAL_SECS", 3600)?);
        let json_logs = env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                key: "PIPELINE_MAX_CONCURRENT",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            addr,
            database_url,
            pass_timeout,
            classifier_timeout,
            max_concurrent,
            inbound_buffer: inbound_buffer.max(1),
            gc_interval,
            json_logs,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.addr.port(), 8790);
        assert_eq!(config.pass_timeout, Duration::from_secs(30));
        assert_eq!(config.classifier_timeout, Duration::from_secs(10));
        assert!(config.max_concurrent > 0);
        assert!(!config.json_logs);
    }
}
