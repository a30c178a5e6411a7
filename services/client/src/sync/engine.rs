//! services/client/src/sync/engine.rs
//!
//! The dispatch loop: routes every inbound channel event to the component
//! that owns the corresponding state. Components never call each other;
//! cross-component facts (like the active conversation) travel as events
//! through this loop.

use crate::sync::messages::MessageSynchronizer;
use crate::sync::ocr::OcrRelay;
use crate::sync::protocol::ServerEvent;
use crate::sync::validation::ValidationCoordinator;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tutor_chat_core::domain::{CelebrationEvent, OcrExtraction};

pub struct SyncEngine {
    events: mpsc::Receiver<ServerEvent>,
    messages: Arc<MessageSynchronizer>,
    validation: Arc<ValidationCoordinator>,
    ocr: Arc<OcrRelay>,
}

impl SyncEngine {
    pub fn new(
        events: mpsc::Receiver<ServerEvent>,
        messages: Arc<MessageSynchronizer>,
        validation: Arc<ValidationCoordinator>,
        ocr: Arc<OcrRelay>,
    ) -> Self {
        Self {
            events,
            messages,
            validation,
            ocr,
        }
    }

    /// Processes events to completion, one at a time, until the connection
    /// manager tears down the event stream.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.dispatch(event).await;
        }
        info!("Channel event stream closed; dispatch loop exiting.");
    }

    async fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::ConnectResponse { status } => {
                info!("Channel session confirmed by server (status: {}).", status);
                // Room scoping does not survive a reconnect; re-join.
                self.messages.rejoin_active().await;
            }
            ServerEvent::ConversationJoined { conversation_id } => {
                info!("Joined conversation {}", conversation_id);
                self.validation.set_conversation(conversation_id).await;
            }
            ServerEvent::MessageReceive(wire) => {
                self.messages.receive(wire.into_domain()).await;
            }
            ServerEvent::MessageAck { message_id, .. } => {
                self.messages.acknowledge(message_id).await;
            }
            ServerEvent::MessageError { message_id, error } => match message_id {
                Some(id) => self.messages.fail(id, &error).await,
                None => warn!("Server reported a message error without an id: {}", error),
            },
            ServerEvent::AnswerValidated(wire) => {
                self.validation.on_validated(wire.into_domain()).await;
            }
            ServerEvent::AnswerValidationError { error, .. } => {
                self.validation.on_validation_error(&error).await;
            }
            ServerEvent::CelebrationTrigger {
                achievement_type,
                streak,
                timestamp,
            } => {
                self.validation
                    .on_celebration(CelebrationEvent {
                        achievement_type,
                        streak,
                        timestamp: timestamp.unwrap_or_else(Utc::now),
                    })
                    .await;
            }
            ServerEvent::OcrProgress {
                image_id,
                stage,
                message,
                percent,
            } => {
                self.ocr.on_progress(&image_id, &stage, message, percent).await;
            }
            ServerEvent::OcrComplete {
                image_id,
                success,
                extracted_text,
                latex,
                confidence,
                error,
            } => {
                let extraction = success.then(|| OcrExtraction {
                    text: extracted_text.unwrap_or_default(),
                    latex,
                    confidence: confidence.unwrap_or(0.0),
                    method_used: None,
                    math_detected: false,
                });
                self.ocr.on_complete(&image_id, success, extraction, error).await;
            }
            // Heartbeat answers are consumed by the connection manager.
            ServerEvent::Pong => debug!("Stray pong reached the dispatch loop."),
        }
    }
}
