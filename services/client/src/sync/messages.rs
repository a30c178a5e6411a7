//! services/client/src/sync/messages.rs
//!
//! The message synchronizer: one authoritative, ordered, deduplicated list
//! of conversation messages, optimistic outbound delivery, and the debounced
//! typing indicator.

use crate::error::SyncError;
use crate::sync::connection::ChannelHandle;
use crate::sync::protocol::ClientEvent;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tutor_chat_core::domain::{ChatMessage, DeliveryStatus, MessageRole};
use tutor_chat_core::ports::ThreadApiService;
use uuid::Uuid;

/// Typing stops automatically after this much input inactivity.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

/// The observable message state. Mutated only through the synchronizer.
#[derive(Debug, Clone, Default)]
pub struct MessageState {
    pub conversation_id: Option<Uuid>,
    pub messages: Vec<ChatMessage>,
    pub typing: bool,
}

pub struct MessageSynchronizer {
    channel: ChannelHandle,
    threads: Arc<dyn ThreadApiService>,
    state: Arc<Mutex<MessageState>>,
    typing_timer: Mutex<Option<CancellationToken>>,
}

impl MessageSynchronizer {
    pub fn new(channel: ChannelHandle, threads: Arc<dyn ThreadApiService>) -> Self {
        Self {
            channel,
            threads,
            state: Arc::new(Mutex::new(MessageState::default())),
            typing_timer: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> MessageState {
        self.state.lock().await.clone()
    }

    pub async fn active_conversation(&self) -> Option<Uuid> {
        self.state.lock().await.conversation_id
    }

    /// Sends a student message: inserts it locally right away with status
    /// `Sending` so the UI reflects the input immediately, then queues the
    /// delivery. A conversation is minted (and joined) if none is active.
    pub async fn send(&self, content: &str) -> Result<Uuid, SyncError> {
        let (conversation_id, is_new) = {
            let mut st = self.state.lock().await;
            match st.conversation_id {
                Some(id) => (id, false),
                None => {
                    let id = Uuid::new_v4();
                    st.conversation_id = Some(id);
                    (id, true)
                }
            }
        };
        if is_new {
            // Scope channel traffic to the fresh conversation before the first message.
            if let Err(e) = self
                .channel
                .emit(ClientEvent::ConversationJoin { conversation_id })
                .await
            {
                warn!("Failed to emit conversation:join: {}", e);
            }
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            conversation_id,
            role: MessageRole::Student,
            content: content.to_string(),
            status: Some(DeliveryStatus::Sending),
            metadata: None,
            created_at: Utc::now(),
        };
        let message_id = message.id;
        {
            let mut st = self.state.lock().await;
            insert_sorted(&mut st.messages, message);
        }

        let event = ClientEvent::MessageSend {
            message_id,
            conversation_id,
            content: content.to_string(),
        };
        if let Err(e) = self.channel.emit(event).await {
            // The optimistic copy stays in place, marked failed, so the UI
            // can offer a retry.
            self.set_status(message_id, DeliveryStatus::Error).await;
            return Err(SyncError::Connection(format!(
                "message could not be queued: {}",
                e
            )));
        }
        Ok(message_id)
    }

    /// Inserts an incoming message. Idempotent against redelivery: a message
    /// id already present is ignored, and the list is re-sorted so arrival
    /// order can never break the chronological invariant.
    pub async fn receive(&self, message: ChatMessage) {
        let mut st = self.state.lock().await;
        if let Some(active) = st.conversation_id {
            if message.conversation_id != active {
                debug!(
                    "Discarding message {} for inactive conversation {}",
                    message.id, message.conversation_id
                );
                return;
            }
        }
        if st.messages.iter().any(|m| m.id == message.id) {
            debug!("Duplicate message {} ignored", message.id);
            return;
        }
        insert_sorted(&mut st.messages, message);
    }

    /// The server accepted the message: `Sending` becomes `Sent`.
    pub async fn acknowledge(&self, message_id: Uuid) {
        let mut st = self.state.lock().await;
        match st.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => message.status = Some(DeliveryStatus::Sent),
            None => warn!("Ack for unknown message {}", message_id),
        }
    }

    /// Delivery failed for one specific message; everything else is intact.
    pub async fn fail(&self, message_id: Uuid, reason: &str) {
        warn!("Message {} failed to deliver: {}", message_id, reason);
        let mut st = self.state.lock().await;
        if let Some(message) = st.messages.iter_mut().find(|m| m.id == message_id) {
            message.status = Some(DeliveryStatus::Error);
        }
    }

    /// Debounced typing indicator. `typing:start` is emitted once on the
    /// false→true edge; re-triggering only restarts the inactivity window,
    /// and `typing:stop` follows automatically after `TYPING_IDLE`.
    pub async fn set_typing(&self, typing: bool) {
        let (conversation_id, was_typing) = {
            let st = self.state.lock().await;
            (st.conversation_id, st.typing)
        };
        let Some(conversation_id) = conversation_id else {
            return;
        };

        if typing {
            if !was_typing {
                self.state.lock().await.typing = true;
                if let Err(e) = self
                    .channel
                    .emit(ClientEvent::TypingStart { conversation_id })
                    .await
                {
                    warn!("Failed to emit typing:start: {}", e);
                }
            }
            let token = CancellationToken::new();
            {
                let mut guard = self.typing_timer.lock().await;
                if let Some(old) = guard.replace(token.clone()) {
                    old.cancel();
                }
            }
            let state = self.state.clone();
            let channel = self.channel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(TYPING_IDLE) => {
                        let mut st = state.lock().await;
                        if st.typing {
                            st.typing = false;
                            drop(st);
                            if let Err(e) = channel
                                .emit(ClientEvent::TypingStop { conversation_id })
                                .await
                            {
                                warn!("Failed to emit typing:stop: {}", e);
                            }
                        }
                    }
                    _ = token.cancelled() => {}
                }
            });
        } else {
            {
                let mut guard = self.typing_timer.lock().await;
                if let Some(old) = guard.take() {
                    old.cancel();
                }
            }
            let mut st = self.state.lock().await;
            if st.typing {
                st.typing = false;
                drop(st);
                if let Err(e) = self
                    .channel
                    .emit(ClientEvent::TypingStop { conversation_id })
                    .await
                {
                    warn!("Failed to emit typing:stop: {}", e);
                }
            }
        }
    }

    /// Replaces the local list with a server-fetched thread over the REST
    /// fallback, re-sorted, and scopes the channel to that conversation.
    pub async fn load_thread(&self, thread_id: Uuid) -> Result<(), SyncError> {
        let thread = self.threads.get_thread(thread_id).await?;
        {
            let mut st = self.state.lock().await;
            st.conversation_id = Some(thread.id);
            st.messages = thread.messages;
            st.messages.sort_by_key(|m| m.created_at);
        }
        self.channel
            .emit(ClientEvent::ConversationJoin {
                conversation_id: thread.id,
            })
            .await?;
        Ok(())
    }

    /// Makes `conversation_id` the active conversation and signals the server
    /// to scope subsequent channel traffic to it.
    pub async fn join_conversation(&self, conversation_id: Uuid) -> Result<(), SyncError> {
        self.state.lock().await.conversation_id = Some(conversation_id);
        self.channel
            .emit(ClientEvent::ConversationJoin { conversation_id })
            .await
    }

    /// Re-emits the join for the active conversation. Called after a fresh
    /// channel session is confirmed, since room scoping does not survive a
    /// transport reconnect.
    pub async fn rejoin_active(&self) {
        let conversation_id = self.state.lock().await.conversation_id;
        if let Some(conversation_id) = conversation_id {
            if let Err(e) = self
                .channel
                .emit(ClientEvent::ConversationJoin { conversation_id })
                .await
            {
                warn!("Failed to re-join conversation after reconnect: {}", e);
            }
        }
    }

    /// Cancels the typing timer so it cannot act on torn-down state.
    pub async fn teardown(&self) {
        let mut guard = self.typing_timer.lock().await;
        if let Some(token) = guard.take() {
            token.cancel();
        }
    }

    async fn set_status(&self, message_id: Uuid, status: DeliveryStatus) {
        let mut st = self.state.lock().await;
        if let Some(message) = st.messages.iter_mut().find(|m| m.id == message_id) {
            message.status = Some(status);
        }
    }
}

/// Stable sort keeps arrival order for equal timestamps.
fn insert_sorted(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    messages.push(message);
    messages.sort_by_key(|m| m.created_at);
}
