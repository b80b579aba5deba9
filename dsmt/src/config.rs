//! Configuration for the dsmt CLI.
//!
//! Settings live in `dsmt.toml`, looked up in the current directory, then
//! `~/.config/dsmt/`, then the platform configuration directory. Directory
//! settings missing from the file fall back to the `DSMC_*` environment
//! variables, then to the library defaults.

use std::path::{Path, PathBuf};

use dirs::{config_dir, home_dir};
use dsmc_dir::DirConfig;
use serde::{Deserialize, Serialize};

use crate::error::{DsmtError, Result};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "dsmt.toml";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub verbose: bool,

    /// Simulation defaults, overridable on the command line.
    #[serde(default)]
    pub simulate: SimulateConfig,

    /// Settings handed to every simulated host.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulateConfig {
    /// Hosts in the simulated cluster.
    #[serde(default = "default_hosts")]
    pub hosts: u32,

    /// Polling rounds after which a scenario counts as stuck.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Print results as JSON instead of text.
    #[serde(default)]
    pub json: bool,
}

/// Mirror of [`DirConfig`] in file form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    pub downgrade_on_read_recall: bool,
    pub max_poll_batch: usize,
    pub event_log: bool,
    pub stats_enabled: bool,
}

fn default_hosts() -> u32 {
    4
}

fn default_max_rounds() -> usize {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            simulate: SimulateConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            max_rounds: default_max_rounds(),
            json: false,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self::from(&DirConfig::from_env())
    }
}

impl From<&DirConfig> for DirectoryConfig {
    fn from(config: &DirConfig) -> Self {
        Self {
            downgrade_on_read_recall: config.downgrade_on_read_recall,
            max_poll_batch: config.max_poll_batch,
            event_log: config.event_log,
            stats_enabled: config.stats_enabled,
        }
    }
}

impl DirectoryConfig {
    /// Host configuration; `verbose` turns on per-event console output.
    pub fn to_dir_config(&self, verbose: bool) -> DirConfig {
        DirConfig {
            downgrade_on_read_recall: self.downgrade_on_read_recall,
            max_poll_batch: self.max_poll_batch,
            verbose: verbose && self.event_log,
            event_log: self.event_log,
            stats_enabled: self.stats_enabled,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns the default configuration if no config file is found.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DsmtError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            DsmtError::Config(format!("Failed to serialize configuration: {}", e))
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    fn check_current_dir_config() -> Option<PathBuf> {
        let path = PathBuf::from(CONFIG_FILE_NAME);
        path.exists().then_some(path)
    }

    fn check_home_config() -> Option<PathBuf> {
        home_dir()
            .map(|dir| dir.join(".config").join("dsmt").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    fn check_system_config() -> Option<PathBuf> {
        config_dir()
            .map(|dir| dir.join("dsmt").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    fn find_config_file() -> Option<PathBuf> {
        Self::check_current_dir_config()
            .or_else(Self::check_home_config)
            .or_else(Self::check_system_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.verbose);
        assert_eq!(config.simulate.hosts, 4);
        assert_eq!(config.simulate.max_rounds, 1_000);
        assert!(config.directory.event_log);
        assert_eq!(config.directory.to_dir_config(false), DirConfig::default());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("dsmt.toml");

        let mut saved = Config::default();
        saved.simulate.hosts = 8;
        saved.directory.downgrade_on_read_recall = true;
        saved.save_to_path(&config_path).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(saved, loaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("dsmt.toml");
        std::fs::write(&config_path, "[simulate]\nhosts = 3\n").unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.simulate.hosts, 3);
        assert_eq!(loaded.simulate.max_rounds, 1_000);
        assert_eq!(loaded.directory, DirectoryConfig::default());
    }

    #[test]
    fn test_verbose_requires_event_log() {
        let directory = DirectoryConfig {
            event_log: false,
            ..Default::default()
        };
        let config = directory.to_dir_config(true);
        assert!(!config.verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_directory_config_mirrors_host_config() {
        let host = DirConfig {
            downgrade_on_read_recall: true,
            max_poll_batch: 16,
            stats_enabled: false,
            ..Default::default()
        };
        let directory = DirectoryConfig::from(&host);
        assert!(directory.downgrade_on_read_recall);
        assert_eq!(directory.max_poll_batch, 16);
        assert_eq!(directory.to_dir_config(false), host);
    }

    #[test]
    fn test_load_from_nonexistent_path() {
        let result = Config::load_from_path(Path::new("/nonexistent/path/dsmt.toml"));
        assert!(matches!(result, Err(DsmtError::Config(_))));
    }
}
