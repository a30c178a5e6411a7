//! crates/tutor_chat_core/src/domain.rs
//!
//! Defines the pure, core data structures for the sync client.
//! These structs are independent of any wire format or transport.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Who authored a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Student,
    Tutor,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Student => "student",
            MessageRole::Tutor => "tutor",
            MessageRole::System => "system",
        }
    }
}

/// Delivery state of a student-originated message. Remote-originated
/// messages carry no delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Error,
}

/// A single message in a conversation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// `None` for messages that originated remotely.
    pub status: Option<DeliveryStatus>,
    /// Free-form server-attached metadata (validation flags, confidence, ...).
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A conversation thread as listed by the REST catalogue.
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
}

/// A fully loaded conversation thread.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<ChatMessage>,
}

/// Detail block of an answer verdict, when the server includes one.
#[derive(Debug, Clone)]
pub struct ValidationDetails {
    pub student_answer: String,
    pub expected_answer: Option<String>,
    pub explanation: Option<String>,
    pub is_approximate: bool,
}

/// The asynchronous verdict for a submitted answer. The `new_streak`
/// reported here is authoritative over any locally tracked value.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub conversation_id: Uuid,
    pub is_correct: bool,
    pub new_streak: u32,
    pub celebration_triggered: bool,
    pub details: Option<ValidationDetails>,
}

/// A time-boxed celebration raised when the streak crosses a milestone.
#[derive(Debug, Clone)]
pub struct CelebrationEvent {
    pub achievement_type: String,
    pub streak: u32,
    pub timestamp: DateTime<Utc>,
}

/// The OCR pipeline to run for an image-processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OcrMethod {
    #[default]
    Hybrid,
    Gpt4o,
    Pix2Text,
}

impl OcrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMethod::Hybrid => "hybrid",
            OcrMethod::Gpt4o => "gpt4o",
            OcrMethod::Pix2Text => "pix2text",
        }
    }
}

impl std::fmt::Display for OcrMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal result of a successful OCR job.
#[derive(Debug, Clone)]
pub struct OcrExtraction {
    pub text: String,
    pub latex: Option<String>,
    pub confidence: f32,
    pub method_used: Option<String>,
    pub math_detected: bool,
}
