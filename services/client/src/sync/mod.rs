pub mod connection;
pub mod engine;
pub mod messages;
pub mod ocr;
pub mod protocol;
pub mod validation;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export the component types the wiring binary and UI collaborators use.
pub use connection::{ChannelHandle, ConnectionManager, ConnectionState, ConnectionStatus};
pub use engine::SyncEngine;
pub use messages::{MessageState, MessageSynchronizer};
pub use ocr::{OcrRelay, OcrState};
pub use validation::{ValidationCoordinator, ValidationState};
