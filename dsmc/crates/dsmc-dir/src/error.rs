//! Error Module - Directory Error Types
//!
//! Defines the error values a directory operation can return.
//!
//! # Error Categories
//!
//! ## Transport Errors
//! - `Transport` - Message could not be handed to the network
//! - `Disconnected` - Peer endpoint is gone
//! - `UnknownHost` - Destination outside the cluster
//!
//! ## Codec Errors
//! - `Codec` - Message body or object payload failed to (de)serialize
//! - `UnknownType` - Inbound message names a payload type never registered
//! - `TypeMismatch` - Object resolved with the wrong Rust type
//!
//! ## Usage Errors
//! - `NotOwner` - Owner-only operation called for a remote handle
//! - `Configuration` - Invalid configuration
//! - `Internal` - Bookkeeping failure that is not a protocol violation
//!
//! Protocol-invariant violations are deliberately absent: they abort through
//! [`protocol_violation!`](crate::protocol_violation) because they mean the
//! coherence logic itself is broken.

use dsmc_util::{Handle, HostId};
use thiserror::Error;

use crate::typeops::TypeTag;

/// Main error type for all directory operations
///
/// # Examples
///
/// ```rust
/// use dsmc_dir::DirError;
///
/// fn handle_error(err: DirError) {
///     match err {
///         DirError::Disconnected { host } => eprintln!("host {} went away", host),
///         other => eprintln!("directory error: {}", other),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum DirError {
    /// Transport refused the message
    ///
    /// **When returned:** Send failed for a reason other than a closed peer
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer endpoint closed
    ///
    /// **When returned:** The receiving side of a loopback channel was dropped
    ///
    /// **Recovery strategy:** None at this layer; hosts are assumed not to crash
    #[error("Host {host} is disconnected")]
    Disconnected { host: HostId },

    /// Destination outside the cluster
    #[error("Unknown host {host} (cluster has {num_hosts} hosts)")]
    UnknownHost { host: HostId, num_hosts: u32 },

    /// Serialization failure
    ///
    /// **When returned:** Message envelope or object payload could not be
    /// encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Inbound message names an unregistered payload type
    ///
    /// **Recovery strategy:** Register every shared type on every host at startup
    #[error("Unknown payload type tag {tag}")]
    UnknownType { tag: TypeTag },

    /// Object exists but holds a different Rust type
    #[error("Type mismatch for {handle}: expected {expected}")]
    TypeMismatch {
        handle: Handle,
        expected: &'static str,
    },

    /// Owner-only operation on a remote handle
    #[error("Host does not own {handle}")]
    NotOwner { handle: Handle },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error - indicates a bug outside the coherence protocol
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DirError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DirError::Transport(_) | DirError::Codec(_))
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            DirError::Internal(_) | DirError::TypeMismatch { .. } | DirError::UnknownType { .. }
        )
    }
}

/// Result type alias for directory operations
pub type Result<T> = std::result::Result<T, DirError>;

/// Abort on a coherence-protocol invariant violation.
///
/// Used for states that can only be reached if the directory logic itself
/// is wrong (a release from a host that holds nothing, an object delivered
/// twice, a recall with no holder). These are never returned as errors.
#[macro_export]
macro_rules! protocol_violation {
    ($handle:expr, $($arg:tt)*) => {
        panic!(
            "Coherence protocol violation on {}: {}",
            $handle,
            format!($($arg)*)
        )
    };
}

/// Check a protocol invariant, aborting with context when it fails.
#[macro_export]
macro_rules! protocol_assert {
    ($cond:expr, $handle:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::protocol_violation!(
                $handle,
                "assertion `{}` failed: {}",
                stringify!($cond),
                format!($($arg)*)
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_display() {
        let err = DirError::Disconnected { host: HostId(3) };
        assert_eq!(err.to_string(), "Host 3 is disconnected");
    }

    #[test]
    fn test_not_owner_display() {
        let err = DirError::NotOwner {
            handle: Handle::new(HostId(1), 4),
        };
        assert_eq!(err.to_string(), "Host does not own 1:4");
    }

    #[test]
    fn test_codec_conversion() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: DirError = json_err.into();
        assert!(matches!(err, DirError::Codec(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_classification() {
        assert!(DirError::Internal("x".into()).is_bug());
        assert!(!DirError::Configuration("x".into()).is_bug());
        assert!(!DirError::NotOwner {
            handle: Handle::new(HostId(0), 1)
        }
        .is_recoverable());
    }

    #[test]
    #[should_panic(expected = "Coherence protocol violation on 0:1")]
    fn test_protocol_violation_panics() {
        protocol_violation!(Handle::new(HostId(0), 1), "release from host {}", 3);
    }

    #[test]
    #[should_panic(expected = "assertion `1 == 2` failed")]
    fn test_protocol_assert_panics() {
        protocol_assert!(1 == 2, Handle::new(HostId(0), 1), "numbers differ");
    }

    #[test]
    fn test_protocol_assert_passes() {
        protocol_assert!(1 == 1, Handle::new(HostId(0), 1), "numbers differ");
    }
}
