//! Configuration file discovery
//!
//! Finds the run configuration in standard locations.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::RunConfig;

/// Project-local configuration file locations (in order of precedence)
pub const CONFIG_LOCATIONS: &[&str] = &[
    "./trialrun.yaml",
    "./trialrun.yml",
    "./trialrun.json",
    "./.trialrun.yaml",
];

/// Candidate paths: project-local files, then the user config directory
fn candidates() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = CONFIG_LOCATIONS.iter().map(PathBuf::from).collect();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("trialrun").join("config.yaml"));
    }
    paths
}

/// Find configuration file in standard locations
pub fn find_config() -> Option<PathBuf> {
    candidates().into_iter().find(|path| path.exists())
}

/// Load an explicit file, else the first one found, else defaults
///
/// An explicit path that does not exist is an error.
pub fn load_or_default(explicit: Option<&Path>) -> Result<(RunConfig, Option<PathBuf>)> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config(),
    };

    match path {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            let config = RunConfig::load(&path)?;
            Ok((config, Some(path)))
        }
        None => Ok((RunConfig::default(), None)),
    }
}
