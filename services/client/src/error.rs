//! services/client/src/error.rs
//!
//! Defines the primary error type for the entire sync client.

use crate::config::ConfigError;
use tutor_chat_core::ports::PortError;

/// The primary error type for the `client` service.
///
/// Stale progress/completion events from superseded jobs are deliberately
/// not represented here; they are discarded silently at the relay.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// The channel is unreachable or torn down. Recovered by automatic
    /// reconnection; surfaced only as a status indicator.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation was invoked before its preconditions held
    /// (no active conversation, channel not established).
    #[error("Not ready: {0}")]
    NotReady(String),

    /// A specific outgoing message failed to deliver. Retryable by re-send.
    #[error("Send failure: {0}")]
    Send(String),

    /// A remote validation request failed. Transient; streak unaffected.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An OCR job failed or timed out. Requires user-initiated retry.
    #[error("Async task error: {0}")]
    AsyncTask(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
