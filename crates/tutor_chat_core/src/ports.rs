//! crates/tutor_chat_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the sync client's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! engine to be independent of specific transports like WebSockets or HTTP.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{OcrExtraction, OcrMethod, Thread, ThreadSummary};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., HTTP, WebSocket).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Operation timed out: {0}")]
    Timeout(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Dials the persistent bidirectional channel to the tutoring service.
///
/// One dial yields one logical connection; the connection manager owns the
/// redial policy, so implementations only need to establish a single session.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn dial(&self) -> PortResult<Box<dyn ChannelConnection>>;
}

/// One established channel session. Frames are JSON text.
#[async_trait]
pub trait ChannelConnection: Send {
    async fn send(&mut self, frame: String) -> PortResult<()>;

    /// Receives the next frame. `None` means the remote closed the channel.
    async fn recv(&mut self) -> Option<PortResult<String>>;
}

/// The REST fallback surface of the tutoring service.
#[async_trait]
pub trait ThreadApiService: Send + Sync {
    /// Lists recent conversation threads, most recently updated first.
    async fn list_threads(&self, limit: usize) -> PortResult<Vec<ThreadSummary>>;

    /// Fetches one thread with its full message list.
    async fn get_thread(&self, thread_id: Uuid) -> PortResult<Thread>;

    /// Deletes a thread and all of its messages.
    async fn delete_thread(&self, thread_id: Uuid) -> PortResult<()>;

    /// Synchronous OCR extraction, used when the channel is unavailable.
    async fn extract_text(
        &self,
        image_id: &str,
        subject: Option<&str>,
        method: OcrMethod,
    ) -> PortResult<OcrExtraction>;
}
