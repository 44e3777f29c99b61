//! Configuration module
//!
//! Run settings layered as defaults < config file < environment < CLI flags.

mod env;
mod file;

pub use env::{EnvConfig, ENV_PREFIX};
pub use file::{find_config, load_or_default, CONFIG_LOCATIONS};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::params::Selector;
use crate::utils::logger::LogLevel;

/// Settings for one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Concurrent execution slots
    pub concurrency: usize,

    /// Bounded queue size between discovery and the slots
    pub queue_capacity: usize,

    /// Per-unit timeout in seconds; none disables it
    pub timeout_secs: Option<u64>,

    /// Capture unit output into its result
    pub capture_output: bool,

    /// Identifier selectors; empty runs everything
    pub selectors: Vec<String>,

    /// Only run definitions carrying this marker
    pub marker: Option<String>,

    /// Log level used when `RUST_LOG` is unset
    pub log_level: LogLevel,
}

impl Default for RunConfig {
    fn default() -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            concurrency,
            queue_capacity: 64,
            timeout_secs: None,
            capture_output: true,
            selectors: Vec::new(),
            marker: None,
            log_level: LogLevel::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.timeout_secs == Some(0) {
            anyhow::bail!("timeout_secs must be positive; omit it to disable the timeout");
        }
        for raw in &self.selectors {
            Selector::parse(raw)?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert!(config.concurrency >= 1);
        assert_eq!(config.queue_capacity, 64);
        assert!(config.capture_output);
        assert!(config.timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_yaml_and_json() {
        let dir = tempdir().unwrap();
        let config = RunConfig {
            concurrency: 3,
            timeout_secs: Some(10),
            selectors: vec!["tests/unit".to_string()],
            marker: Some("fast".to_string()),
            ..RunConfig::default()
        };

        for name in ["run.yaml", "nested/run.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(RunConfig::load(&path).unwrap(), config);
        }
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.yml");
        std::fs::write(&path, "concurrency: 2\ncapture_output: false\n").unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert!(!config.capture_output);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            RunConfig { concurrency: 0, ..RunConfig::default() },
            RunConfig { queue_capacity: 0, ..RunConfig::default() },
            RunConfig { timeout_secs: Some(0), ..RunConfig::default() },
            RunConfig { selectors: vec!["t.rs::".into()], ..RunConfig::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_log_level_read_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("levels.yaml");
        std::fs::write(&path, "log_level: warning\n").unwrap();
        assert_eq!(RunConfig::load(&path).unwrap().log_level(), LogLevel::Warn);

        std::fs::write(&path, "log_level: debug\n").unwrap();
        assert_eq!(RunConfig::load(&path).unwrap().log_level(), LogLevel::Debug);

        std::fs::write(&path, "log_level: loud\n").unwrap();
        let err = RunConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = RunConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse JSON config"));
    }
}
