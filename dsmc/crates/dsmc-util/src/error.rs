//! Core error types for dsmc-util crate

use thiserror::Error;

/// Error type for handle parsing and construction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    /// Text is not of the form `host:slot`
    #[error("Malformed handle: {0}")]
    Malformed(String),

    /// Host component is the reserved invalid id
    #[error("Invalid host id in handle: {host}")]
    InvalidHost { host: u32 },
}

/// Result type alias for handle operations
pub type HandleResult<T> = std::result::Result<T, HandleError>;
