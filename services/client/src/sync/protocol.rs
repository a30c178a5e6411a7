//! services/client/src/sync/protocol.rs
//!
//! Defines the channel message protocol between the sync client and the
//! tutoring service. Every frame is a JSON object of the form
//! `{"event": <name>, "data": <payload>}`, mirroring the named-event pairs
//! the service exchanges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tutor_chat_core::domain::{
    ChatMessage, MessageRole, ValidationDetails, ValidationResult,
};

//=========================================================================================
// Events Sent FROM the Client TO the Service
//=========================================================================================

/// Represents the structured events the client can emit over the channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Delivers a new student message. The id is client-generated so the
    /// server can deduplicate redelivered frames.
    #[serde(rename = "message:send")]
    MessageSend {
        message_id: Uuid,
        conversation_id: Uuid,
        content: String,
    },

    /// The student started composing input in the active conversation.
    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: Uuid },

    /// The student has been idle past the debounce window.
    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid },

    /// Scopes subsequent channel traffic to one conversation (room join).
    #[serde(rename = "conversation:join")]
    ConversationJoin { conversation_id: Uuid },

    /// Submits a student answer for asynchronous validation.
    #[serde(rename = "answer:validate")]
    AnswerValidate {
        conversation_id: Uuid,
        student_answer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_answer: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        current_streak: u32,
    },

    /// Starts an OCR job for a previously uploaded image.
    #[serde(rename = "ocr:process")]
    OcrProcess {
        image_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        method: String,
    },

    /// Heartbeat probe. The service answers with `pong`.
    #[serde(rename = "ping")]
    Ping,
}

//=========================================================================================
// Events Sent FROM the Service TO the Client
//=========================================================================================

/// Represents the structured events the service can push to the client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Confirms that a fresh channel session has been established.
    #[serde(rename = "connect_response")]
    ConnectResponse { status: String },

    /// Confirms a `conversation:join` request.
    #[serde(rename = "conversation:joined")]
    ConversationJoined { conversation_id: Uuid },

    /// A new message in the active conversation (student echo or tutor reply).
    #[serde(rename = "message:receive")]
    MessageReceive(WireMessage),

    /// The server accepted a previously sent message.
    #[serde(rename = "message:ack")]
    MessageAck {
        message_id: Uuid,
        #[serde(default)]
        status: Option<String>,
    },

    /// A previously sent message failed server-side.
    #[serde(rename = "message:error")]
    MessageError {
        #[serde(default)]
        message_id: Option<Uuid>,
        error: String,
    },

    /// The asynchronous verdict for a submitted answer.
    #[serde(rename = "answer:validated")]
    AnswerValidated(WireValidation),

    /// The validation request itself failed.
    #[serde(rename = "answer:validation_error")]
    AnswerValidationError {
        error: String,
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },

    /// A streak milestone celebration pushed by the service.
    #[serde(rename = "celebration:trigger")]
    CelebrationTrigger {
        achievement_type: String,
        streak: u32,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Multi-stage progress for the tracked OCR job.
    #[serde(rename = "ocr:progress")]
    OcrProgress {
        image_id: String,
        stage: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        percent: Option<u8>,
    },

    /// Terminal state of an OCR job.
    #[serde(rename = "ocr:complete")]
    OcrComplete {
        image_id: String,
        success: bool,
        #[serde(default)]
        extracted_text: Option<String>,
        #[serde(default)]
        latex: Option<String>,
        #[serde(default)]
        confidence: Option<f32>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Heartbeat answer. Consumed by the connection manager, never dispatched.
    #[serde(rename = "pong")]
    Pong,
}

//=========================================================================================
// Wire Payload Structs and Domain Conversions
//=========================================================================================

/// A message as it appears on the wire and in REST thread payloads.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl WireMessage {
    /// Converts the wire representation into the pure domain message.
    /// Unknown roles are treated as system traffic rather than rejected.
    pub fn into_domain(self) -> ChatMessage {
        let role = match self.role.as_str() {
            "student" => MessageRole::Student,
            "tutor" => MessageRole::Tutor,
            _ => MessageRole::System,
        };
        ChatMessage {
            id: self.id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            status: None,
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}

/// An answer verdict as it appears on the wire.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireValidation {
    pub conversation_id: Uuid,
    pub is_correct: bool,
    pub new_streak: u32,
    #[serde(default)]
    pub celebration_triggered: bool,
    #[serde(default)]
    pub details: Option<WireValidationDetails>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireValidationDetails {
    pub student_answer: String,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub is_approximate: bool,
}

impl WireValidation {
    pub fn into_domain(self) -> ValidationResult {
        ValidationResult {
            conversation_id: self.conversation_id,
            is_correct: self.is_correct,
            new_streak: self.new_streak,
            celebration_triggered: self.celebration_triggered,
            details: self.details.map(|d| ValidationDetails {
                student_answer: d.student_answer,
                expected_answer: d.expected_answer,
                explanation: d.explanation,
                is_approximate: d.is_approximate,
            }),
        }
    }
}

//=========================================================================================
// Frame Encoding Helpers
//=========================================================================================

/// Serializes a client event into a channel frame.
pub fn encode(event: &ClientEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Parses a channel frame into a server event.
pub fn decode(frame: &str) -> Result<ServerEvent, serde_json::Error> {
    serde_json::from_str(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_send_uses_expected_event_name_and_keys() {
        let event = ClientEvent::MessageSend {
            message_id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            content: "What is 2+2?".to_string(),
        };
        let frame = encode(&event).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "message:send");
        assert_eq!(value["data"]["content"], "What is 2+2?");
        assert!(value["data"]["message_id"].is_string());
        assert!(value["data"]["conversation_id"].is_string());
    }

    #[test]
    fn ping_frame_has_no_payload() {
        let frame = encode(&ClientEvent::Ping).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "ping");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn answer_validate_omits_absent_optionals() {
        let event = ClientEvent::AnswerValidate {
            conversation_id: Uuid::nil(),
            student_answer: "5".to_string(),
            expected_answer: None,
            context: None,
            current_streak: 2,
        };
        let frame = encode(&event).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert!(value["data"].get("expected_answer").is_none());
        assert_eq!(value["data"]["current_streak"], 2);
    }

    #[test]
    fn decodes_validated_verdict_with_details() {
        let frame = r#"{
            "event": "answer:validated",
            "data": {
                "conversation_id": "00000000-0000-0000-0000-000000000001",
                "is_correct": true,
                "new_streak": 3,
                "celebration_triggered": true,
                "details": {
                    "student_answer": "x = 5",
                    "explanation": "Correct! Well done."
                }
            }
        }"#;
        match decode(frame).unwrap() {
            ServerEvent::AnswerValidated(wire) => {
                let result = wire.into_domain();
                assert!(result.is_correct);
                assert_eq!(result.new_streak, 3);
                let details = result.details.unwrap();
                assert_eq!(details.student_answer, "x = 5");
                assert!(!details.is_approximate);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_pong_and_ocr_progress() {
        assert!(matches!(
            decode(r#"{"event":"pong"}"#).unwrap(),
            ServerEvent::Pong
        ));

        let frame = r#"{
            "event": "ocr:progress",
            "data": {"image_id": "img-1", "stage": "preprocessing", "percent": 40}
        }"#;
        match decode(frame).unwrap() {
            ServerEvent::OcrProgress {
                image_id,
                stage,
                message,
                percent,
            } => {
                assert_eq!(image_id, "img-1");
                assert_eq!(stage, "preprocessing");
                assert_eq!(message, None);
                assert_eq!(percent, Some(40));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_wire_role_falls_back_to_system() {
        let wire = WireMessage {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role: "moderator".to_string(),
            content: "notice".to_string(),
            metadata: None,
            created_at: Utc::now(),
        };
        assert_eq!(wire.into_domain().role, MessageRole::System);
    }
}
