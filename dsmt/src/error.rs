//! Error handling for the dsmt CLI.

use thiserror::Error;

/// Main error type for the dsmt CLI.
#[derive(Error, Debug)]
pub enum DsmtError {
    /// Missing or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad command-line input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A scenario never reached quiescence.
    #[error("Scenario '{scenario}' still busy after {rounds} rounds")]
    Stuck { scenario: String, rounds: usize },

    /// A scenario finished with the wrong result.
    #[error("Scenario '{scenario}' check failed: {message}")]
    CheckFailed { scenario: String, message: String },

    /// Error from the coherence layer.
    #[error("Directory error: {0}")]
    Dir(#[from] dsmc_dir::DirError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias using DsmtError.
pub type Result<T> = std::result::Result<T, DsmtError>;
