pub mod domain;
pub mod ports;

pub use domain::{
    CelebrationEvent, ChatMessage, DeliveryStatus, MessageRole, OcrExtraction, OcrMethod, Thread,
    ThreadSummary, ValidationDetails, ValidationResult,
};
pub use ports::{ChannelConnection, ChannelTransport, PortError, PortResult, ThreadApiService};
