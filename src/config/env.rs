//! Environment variable configuration
//!
//! Provides environment variable overrides for the run configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::RunConfig;
use crate::utils::logger::LogLevel;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TRIALRUN";

/// Overrides read from `TRIALRUN_*` variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Slots from TRIALRUN_CONCURRENCY
    pub concurrency: Option<usize>,
    /// Queue size from TRIALRUN_QUEUE_CAPACITY
    pub queue_capacity: Option<usize>,
    /// Per-unit timeout from TRIALRUN_TIMEOUT, in seconds
    pub timeout: Option<u64>,
    /// Capture flag from TRIALRUN_CAPTURE
    pub capture: Option<bool>,
    /// Marker filter from TRIALRUN_MARK
    pub mark: Option<String>,
    /// Log level from TRIALRUN_LOG; unknown names are ignored
    pub log: Option<LogLevel>,
    /// Config file from TRIALRUN_CONFIG
    pub config_file: Option<PathBuf>,
}

impl EnvConfig {
    /// Load configuration from the process environment
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary lookup, keyed by the full variable name
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}")).filter(|v| !v.is_empty());

        Self {
            concurrency: parse_value(get("CONCURRENCY")),
            queue_capacity: parse_value(get("QUEUE_CAPACITY")),
            timeout: parse_value(get("TIMEOUT")),
            capture: get("CAPTURE").map(|v| parse_bool(&v)),
            mark: get("MARK"),
            log: parse_value(get("LOG")),
            config_file: get("CONFIG").map(PathBuf::from),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self != &Self::default()
    }

    /// Overlay the set values onto a config
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(capture) = self.capture {
            config.capture_output = capture;
        }
        if let Some(mark) = &self.mark {
            config.marker = Some(mark.clone());
        }
        if let Some(level) = self.log {
            config.log_level = level;
        }
    }
}

fn parse_value<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EnvConfig::default());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_values_are_parsed() {
        let config = EnvConfig::from_lookup(lookup(&[
            ("TRIALRUN_CONCURRENCY", "6"),
            ("TRIALRUN_TIMEOUT", " 30 "),
            ("TRIALRUN_CAPTURE", "off"),
            ("TRIALRUN_MARK", "slow"),
            ("TRIALRUN_CONFIG", "/tmp/run.yaml"),
            ("TRIALRUN_QUEUE_CAPACITY", "lots"),
            ("OTHER_LOG", "debug"),
            ("TRIALRUN_LOG", "chatty"),
        ]));
        assert_eq!(config.concurrency, Some(6));
        assert_eq!(config.timeout, Some(30));
        assert_eq!(config.capture, Some(false));
        assert_eq!(config.mark.as_deref(), Some("slow"));
        assert_eq!(config.config_file, Some(PathBuf::from("/tmp/run.yaml")));
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.log, None);
    }

    #[test]
    fn test_apply_overrides_only_set_values() {
        let mut config = RunConfig {
            concurrency: 2,
            ..RunConfig::default()
        };
        EnvConfig::from_lookup(lookup(&[("TRIALRUN_LOG", "debug"), ("TRIALRUN_CAPTURE", "yes")]))
            .apply(&mut config);

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.capture_output);
    }
}
