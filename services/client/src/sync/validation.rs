//! services/client/src/sync/validation.rs
//!
//! The validation/streak coordinator: submits answer-checking requests,
//! applies asynchronous verdicts to the streak, and raises time-boxed
//! celebrations when the streak crosses a milestone.

use crate::error::SyncError;
use crate::sync::connection::ChannelHandle;
use crate::sync::protocol::ClientEvent;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tutor_chat_core::domain::{CelebrationEvent, ValidationResult};
use uuid::Uuid;

/// A stored verdict (or verdict error) is discarded after this long.
pub const RESULT_TTL: Duration = Duration::from_secs(10);
/// A celebration clears itself after its display window.
pub const CELEBRATION_TTL: Duration = Duration::from_secs(5);

/// The escalating streak tiers that raise a celebration.
const MILESTONES: [u32; 4] = [3, 6, 9, 15];

/// The observable validation state. Mutated only through the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ValidationState {
    pub conversation_id: Option<Uuid>,
    /// True between a submitted request and its verdict or error.
    pub validating: bool,
    pub last_result: Option<ValidationResult>,
    pub last_error: Option<String>,
    pub streak: u32,
    pub celebration: Option<CelebrationEvent>,
    /// The streak value the current celebration cycle already fired for.
    /// Guards milestone crossing against verdict replays.
    pub last_celebrated: u32,
}

pub struct ValidationCoordinator {
    channel: ChannelHandle,
    state: Arc<Mutex<ValidationState>>,
    result_timer: Mutex<Option<CancellationToken>>,
    celebration_timer: Mutex<Option<CancellationToken>>,
}

impl ValidationCoordinator {
    pub fn new(channel: ChannelHandle) -> Self {
        Self {
            channel,
            state: Arc::new(Mutex::new(ValidationState::default())),
            result_timer: Mutex::new(None),
            celebration_timer: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> ValidationState {
        self.state.lock().await.clone()
    }

    pub async fn current_streak(&self) -> u32 {
        self.state.lock().await.streak
    }

    /// Learned from the `conversation:joined` confirmation routed by the
    /// dispatch engine.
    pub async fn set_conversation(&self, conversation_id: Uuid) {
        self.state.lock().await.conversation_id = Some(conversation_id);
    }

    /// Submits an answer for asynchronous validation. Requires an active
    /// conversation and an established channel; otherwise the call fails
    /// instead of silently queuing.
    pub async fn validate_answer(
        &self,
        student_answer: &str,
        expected_answer: Option<&str>,
        context: Option<&str>,
    ) -> Result<(), SyncError> {
        let (conversation_id, current_streak) = {
            let st = self.state.lock().await;
            (st.conversation_id, st.streak)
        };
        let conversation_id = conversation_id
            .ok_or_else(|| SyncError::NotReady("no active conversation".to_string()))?;
        if !self.channel.is_connected().await {
            return Err(SyncError::NotReady("channel is not connected".to_string()));
        }

        {
            let mut st = self.state.lock().await;
            st.validating = true;
            st.last_error = None;
        }
        let event = ClientEvent::AnswerValidate {
            conversation_id,
            student_answer: student_answer.to_string(),
            expected_answer: expected_answer.map(str::to_string),
            context: context.map(str::to_string),
            current_streak,
        };
        if let Err(e) = self.channel.emit(event).await {
            self.state.lock().await.validating = false;
            return Err(e);
        }
        Ok(())
    }

    /// Applies an asynchronous verdict. The server-reported `new_streak` is
    /// authoritative and overwrites any locally tracked value, so replays and
    /// interleaved validations cannot drift the counter.
    pub async fn on_validated(&self, result: ValidationResult) {
        let celebrate = {
            let mut st = self.state.lock().await;
            st.validating = false;
            st.streak = result.new_streak;
            let mut celebrate = false;
            if result.is_correct {
                if MILESTONES.contains(&result.new_streak)
                    && st.last_celebrated != result.new_streak
                {
                    st.last_celebrated = result.new_streak;
                    let event = CelebrationEvent {
                        achievement_type: achievement_for(result.new_streak),
                        streak: result.new_streak,
                        timestamp: Utc::now(),
                    };
                    info!(
                        "Streak milestone reached: {} ({})",
                        result.new_streak, event.achievement_type
                    );
                    st.celebration = Some(event);
                    celebrate = true;
                }
            } else {
                // Incorrect resets are immediate and unconditional, and they
                // re-arm every milestone for the next climb.
                st.last_celebrated = 0;
            }
            st.last_result = Some(result);
            st.last_error = None;
            celebrate
        };
        if celebrate {
            self.schedule_celebration_clear().await;
        }
        self.schedule_result_clear().await;
    }

    /// A failed validation request is transient: the flag clears, the error
    /// is stored for display, and the streak is untouched.
    pub async fn on_validation_error(&self, reason: &str) {
        warn!("Answer validation failed: {}", reason);
        {
            let mut st = self.state.lock().await;
            st.validating = false;
            st.last_error = Some(reason.to_string());
        }
        self.schedule_result_clear().await;
    }

    /// A server-pushed celebration. Passes through the same crossing guard as
    /// the locally derived trigger, so the two paths cannot double-fire for
    /// one underlying validation.
    pub async fn on_celebration(&self, event: CelebrationEvent) {
        {
            let mut st = self.state.lock().await;
            if st.last_celebrated == event.streak {
                return;
            }
            st.last_celebrated = event.streak;
            st.celebration = Some(event);
        }
        self.schedule_celebration_clear().await;
    }

    /// Discards the last verdict and error so transient feedback does not
    /// persist indefinitely. Also invoked automatically after `RESULT_TTL`.
    pub async fn clear_validation_result(&self) {
        {
            let mut guard = self.result_timer.lock().await;
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
        let mut st = self.state.lock().await;
        st.last_result = None;
        st.last_error = None;
    }

    /// Explicit reset, e.g. when the student switches conversations.
    pub async fn reset_streak(&self) {
        let mut st = self.state.lock().await;
        st.streak = 0;
        st.last_celebrated = 0;
    }

    /// Cancels the auto-clear timers so they cannot act on torn-down state.
    pub async fn teardown(&self) {
        for timer in [&self.result_timer, &self.celebration_timer] {
            let mut guard = timer.lock().await;
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
    }

    async fn schedule_result_clear(&self) {
        let token = CancellationToken::new();
        {
            let mut guard = self.result_timer.lock().await;
            if let Some(old) = guard.replace(token.clone()) {
                old.cancel();
            }
        }
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(RESULT_TTL) => {
                    let mut st = state.lock().await;
                    st.last_result = None;
                    st.last_error = None;
                }
                _ = token.cancelled() => {}
            }
        });
    }

    async fn schedule_celebration_clear(&self) {
        let token = CancellationToken::new();
        {
            let mut guard = self.celebration_timer.lock().await;
            if let Some(old) = guard.replace(token.clone()) {
                old.cancel();
            }
        }
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(CELEBRATION_TTL) => {
                    state.lock().await.celebration = None;
                }
                _ = token.cancelled() => {}
            }
        });
    }
}

fn achievement_for(streak: u32) -> String {
    format!("{}-in-a-row", streak)
}
