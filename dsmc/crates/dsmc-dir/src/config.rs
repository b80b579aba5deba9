//! Configuration Module - Directory Tuning Parameters
//!
//! Manages the knobs that change protocol behavior or observability.
//! The defaults follow the plain protocol: a recalled writer drops its copy,
//! events are recorded, statistics are collected.

/// Main configuration for a host's directories
///
/// # Examples
///
/// ```rust
/// use dsmc_dir::DirConfig;
///
/// let config = DirConfig {
///     downgrade_on_read_recall: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DirConfig {
    /// Keep a read-only copy when a writer is recalled on behalf of a reader
    ///
    /// The writer ships its bytes to the owner tagged `UP_RO` and stays in
    /// the RO state instead of returning to Invalid.
    ///
    /// Default: false
    pub downgrade_on_read_recall: bool,

    /// Maximum inbound messages dispatched by a single `poll()`
    ///
    /// Bounds the time the polling thread spends inside the directory.
    /// Default: 1024
    pub max_poll_batch: usize,

    /// Print protocol events to the console as they happen
    ///
    /// Default: false
    pub verbose: bool,

    /// Record protocol events in the host's event log
    ///
    /// Default: true
    pub event_log: bool,

    /// Collect protocol counters and fetch latency
    ///
    /// Default: true
    pub stats_enabled: bool,
}

impl Default for DirConfig {
    fn default() -> Self {
        DirConfig {
            downgrade_on_read_recall: false,
            max_poll_batch: 1024,
            verbose: false,
            event_log: true,
            stats_enabled: true,
        }
    }
}

impl DirConfig {
    /// Validate configuration
    ///
    /// ```rust
    /// use dsmc_dir::DirConfig;
    ///
    /// let config = DirConfig {
    ///     max_poll_batch: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_poll_batch == 0 {
            return Err(ConfigError::InvalidPollBatch(
                "max_poll_batch must be > 0".to_string(),
            ));
        }

        if self.verbose && !self.event_log {
            return Err(ConfigError::InvalidLogging(
                "verbose output requires event_log".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - DSMC_DOWNGRADE_ON_READ
    /// - DSMC_POLL_BATCH
    /// - DSMC_VERBOSE
    /// - DSMC_EVENT_LOG
    /// - DSMC_STATS
    ///
    /// ```bash
    /// export DSMC_DOWNGRADE_ON_READ=1
    /// export DSMC_POLL_BATCH=256
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DSMC_DOWNGRADE_ON_READ") {
            config.downgrade_on_read_recall = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("DSMC_POLL_BATCH") {
            if let Ok(batch) = val.parse::<usize>() {
                config.max_poll_batch = batch;
            }
        }

        if let Ok(val) = std::env::var("DSMC_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("DSMC_EVENT_LOG") {
            config.event_log = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("DSMC_STATS") {
            config.stats_enabled = parse_flag(&val);
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid poll batch: {0}")]
    InvalidPollBatch(String),

    #[error("Invalid logging setup: {0}")]
    InvalidLogging(String),
}
