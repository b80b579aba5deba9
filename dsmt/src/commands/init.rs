//! `init` command: write a default `dsmt.toml`.

use std::path::PathBuf;

use tracing::info;

use crate::config::{Config, CONFIG_FILE_NAME};
use crate::error::{DsmtError, Result};

/// Arguments for the init command.
#[derive(Debug, Clone, Default)]
pub struct InitArgs {
    /// Directory to write the configuration into (default: current directory)
    pub path: Option<PathBuf>,
    /// Overwrite an existing configuration file
    pub force: bool,
}

/// Run the init command, returning the path written.
pub fn run_init(args: InitArgs) -> Result<PathBuf> {
    let dir = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    if dir.exists() && !dir.is_dir() {
        return Err(DsmtError::Validation(format!(
            "target is not a directory: {}",
            dir.display()
        )));
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() && !args.force {
        return Err(DsmtError::Validation(format!(
            "{} already exists, use --force to overwrite",
            config_path.display()
        )));
    }

    Config::default().save_to_path(&config_path)?;
    info!(path = %config_path.display(), "wrote configuration");
    Ok(config_path)
}
