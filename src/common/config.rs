//! Configuration for the reconciliation manager
//!
//! Values are layered: defaults, then an optional TOML file, then
//! `REPLICON__*` environment variables.

use crate::common::utils::duration_str;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "REPLICON";

/// Reconciliation manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Period between full evaluation cycles
    #[serde(default = "default_interval", with = "duration_str")]
    pub interval: Duration,

    /// Queue entries drained (containers repaired) per cycle
    #[serde(default = "default_max_repairs_per_cycle")]
    pub max_repairs_per_cycle: usize,

    /// How long a dispatched repair counts as in flight
    #[serde(default = "default_inflight_timeout", with = "duration_str")]
    pub inflight_timeout: Duration,

    /// Capacity of the outbound directive channel
    #[serde(default = "default_directive_channel_capacity")]
    pub directive_channel_capacity: usize,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_max_repairs_per_cycle() -> usize {
    100
}
fn default_inflight_timeout() -> Duration {
    Duration::from_secs(600)
}
fn default_directive_channel_capacity() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_repairs_per_cycle: default_max_repairs_per_cycle(),
            inflight_timeout: default_inflight_timeout(),
            directive_channel_capacity: default_directive_channel_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: ReconcilerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the manager cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.interval.is_zero() {
            return Err(crate::Error::InvalidConfig("interval must be non-zero".into()));
        }
        if self.max_repairs_per_cycle == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_repairs_per_cycle must be at least 1".into(),
            ));
        }
        if self.directive_channel_capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "directive_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.max_repairs_per_cycle, 100);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "interval = \"5s\"").unwrap();
        writeln!(file, "max_repairs_per_cycle = 7").unwrap();
        writeln!(file, "inflight_timeout = \"2m\"").unwrap();

        let config = ReconcilerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.max_repairs_per_cycle, 7);
        assert_eq!(config.inflight_timeout, Duration::from_secs(120));
        assert_eq!(config.directive_channel_capacity, 1024);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_repairs_per_cycle = 0").unwrap();
        assert!(ReconcilerConfig::load(Some(file.path())).is_err());

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "interval = \"soon\"").unwrap();
        assert!(ReconcilerConfig::load(Some(file.path())).is_err());
    }
}
