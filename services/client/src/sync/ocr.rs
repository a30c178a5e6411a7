//! services/client/src/sync/ocr.rs
//!
//! The async task relay for image OCR jobs: submits a job over the channel
//! (or the REST fallback when the channel is down), relays identity-checked
//! progress, and resolves to a terminal state.

use crate::error::SyncError;
use crate::sync::connection::ChannelHandle;
use crate::sync::protocol::ClientEvent;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tutor_chat_core::domain::{OcrExtraction, OcrMethod};
use tutor_chat_core::ports::ThreadApiService;

/// A job with no terminal event within this window is failed and released.
/// The REST fallback uses the same extended window at the adapter level.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(180);

/// The observable OCR job state. Mutated only through the relay.
#[derive(Debug, Clone, Default)]
pub struct OcrState {
    /// The job whose events are currently accepted; everything else is stale.
    pub active_job: Option<String>,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub percent: Option<u8>,
    pub result: Option<OcrExtraction>,
    pub error: Option<String>,
}

impl OcrState {
    pub fn in_progress(&self) -> bool {
        self.active_job.is_some()
    }
}

pub struct OcrRelay {
    channel: ChannelHandle,
    api: Arc<dyn ThreadApiService>,
    state: Arc<Mutex<OcrState>>,
    watchdog: Mutex<Option<CancellationToken>>,
}

impl OcrRelay {
    pub fn new(channel: ChannelHandle, api: Arc<dyn ThreadApiService>) -> Self {
        Self {
            channel,
            api,
            state: Arc::new(Mutex::new(OcrState::default())),
            watchdog: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> OcrState {
        self.state.lock().await.clone()
    }

    /// Submits an OCR job for a previously uploaded image. A new submission
    /// supersedes any tracked job, whose later events become stale. With the
    /// channel connected the job runs asynchronously over it; otherwise the
    /// synchronous REST fallback resolves the job before returning. Callers
    /// observe the same state either way.
    pub async fn submit(
        &self,
        image_id: &str,
        subject: Option<&str>,
        method: OcrMethod,
    ) -> Result<(), SyncError> {
        {
            let mut st = self.state.lock().await;
            st.active_job = Some(image_id.to_string());
            st.stage = Some("submitted".to_string());
            st.message = None;
            st.percent = None;
            st.result = None;
            st.error = None;
        }
        self.cancel_watchdog().await;
        info!("Submitting OCR job {} (method: {})", image_id, method);

        if self.channel.is_connected().await {
            let event = ClientEvent::OcrProcess {
                image_id: image_id.to_string(),
                subject: subject.map(str::to_string),
                method: method.as_str().to_string(),
            };
            match self.channel.emit(event).await {
                Ok(()) => {
                    self.arm_watchdog(image_id.to_string()).await;
                    return Ok(());
                }
                Err(e) => warn!("Channel submit failed, using HTTP fallback: {}", e),
            }
        }

        match self.api.extract_text(image_id, subject, method).await {
            Ok(extraction) => {
                let mut st = self.state.lock().await;
                if st.active_job.as_deref() == Some(image_id) {
                    st.active_job = None;
                    st.stage = Some("completed".to_string());
                    st.result = Some(extraction);
                }
                Ok(())
            }
            Err(e) => {
                let mut st = self.state.lock().await;
                if st.active_job.as_deref() == Some(image_id) {
                    st.active_job = None;
                    st.error = Some(e.to_string());
                }
                Err(SyncError::AsyncTask(e.to_string()))
            }
        }
    }

    /// Applies a progress event, but only for the tracked job. `percent` may
    /// be absent for stage-only progress.
    pub async fn on_progress(
        &self,
        job_id: &str,
        stage: &str,
        message: Option<String>,
        percent: Option<u8>,
    ) {
        let mut st = self.state.lock().await;
        if st.active_job.as_deref() != Some(job_id) {
            debug!("Discarding progress for stale OCR job {}", job_id);
            return;
        }
        st.stage = Some(stage.to_string());
        if message.is_some() {
            st.message = message;
        }
        if percent.is_some() {
            st.percent = percent;
        }
    }

    /// Applies a terminal event, but only for the tracked job. A completion
    /// with no prior progress (cache hit) is a valid success path.
    pub async fn on_complete(
        &self,
        job_id: &str,
        success: bool,
        extraction: Option<OcrExtraction>,
        error: Option<String>,
    ) {
        {
            let mut st = self.state.lock().await;
            if st.active_job.as_deref() != Some(job_id) {
                debug!("Discarding completion for stale OCR job {}", job_id);
                return;
            }
            st.active_job = None;
            if success {
                st.stage = Some("completed".to_string());
                st.result = extraction;
            } else {
                let reason = error.unwrap_or_else(|| "OCR processing failed".to_string());
                warn!("OCR job {} failed: {}", job_id, reason);
                st.error = Some(reason);
            }
        }
        self.cancel_watchdog().await;
    }

    /// Abandons the tracked job. The remote computation is not cancelled;
    /// its future events simply become stale.
    pub async fn cancel(&self) {
        {
            let mut st = self.state.lock().await;
            st.active_job = None;
            st.stage = None;
            st.message = None;
            st.percent = None;
        }
        self.cancel_watchdog().await;
    }

    /// Cancels the watchdog so it cannot act on torn-down state.
    pub async fn teardown(&self) {
        self.cancel_watchdog().await;
    }

    async fn arm_watchdog(&self, job_id: String) {
        let token = CancellationToken::new();
        {
            let mut guard = self.watchdog.lock().await;
            if let Some(old) = guard.replace(token.clone()) {
                old.cancel();
            }
        }
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(JOB_TIMEOUT) => {
                    let mut st = state.lock().await;
                    if st.active_job.as_deref() == Some(job_id.as_str()) {
                        // Release the id so a later submission cannot be
                        // mistaken for a continuation of this job.
                        st.active_job = None;
                        st.error = Some("OCR job timed out".to_string());
                        warn!("OCR job {} timed out after {:?}", job_id, JOB_TIMEOUT);
                    }
                }
                _ = token.cancelled() => {}
            }
        });
    }

    async fn cancel_watchdog(&self) {
        let mut guard = self.watchdog.lock().await;
        if let Some(token) = guard.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testkit::{connected_handle, disconnected_handle, drain_events, StubThreadApi};

    fn extraction(text: &str) -> OcrExtraction {
        OcrExtraction {
            text: text.to_string(),
            latex: None,
            confidence: 0.9,
            method_used: Some("hybrid".to_string()),
            math_detected: true,
        }
    }

    fn relay() -> (OcrRelay, tokio::sync::mpsc::Receiver<ClientEvent>, Arc<StubThreadApi>) {
        let (handle, rx) = connected_handle();
        let api = Arc::new(StubThreadApi::new());
        (OcrRelay::new(handle, api.clone()), rx, api)
    }

    #[tokio::test]
    async fn connected_submit_goes_over_the_channel() {
        let (relay, mut rx, api) = relay();
        relay
            .submit("img-1", Some("algebra"), OcrMethod::Hybrid)
            .await
            .unwrap();

        assert!(relay.snapshot().await.in_progress());
        let events = drain_events(&mut rx);
        match &events[0] {
            ClientEvent::OcrProcess {
                image_id,
                subject,
                method,
            } => {
                assert_eq!(image_id, "img-1");
                assert_eq!(subject.as_deref(), Some("algebra"));
                assert_eq!(method, "hybrid");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(api.extract_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_progress_is_discarded() {
        let (relay, _rx, _api) = relay();
        relay.submit("job-a", None, OcrMethod::Hybrid).await.unwrap();

        relay
            .on_progress("job-b", "preprocessing", None, Some(50))
            .await;

        let snapshot = relay.snapshot().await;
        assert_eq!(snapshot.active_job.as_deref(), Some("job-a"));
        assert_eq!(snapshot.stage.as_deref(), Some("submitted"));
        assert_eq!(snapshot.percent, None);
    }

    #[tokio::test]
    async fn stale_completion_is_discarded() {
        let (relay, _rx, _api) = relay();
        relay.submit("job-a", None, OcrMethod::Hybrid).await.unwrap();

        relay
            .on_complete("job-b", true, Some(extraction("stale")), None)
            .await;

        let snapshot = relay.snapshot().await;
        assert!(snapshot.in_progress());
        assert!(snapshot.result.is_none());
    }

    #[tokio::test]
    async fn progress_then_success_resolves_the_job() {
        let (relay, _rx, _api) = relay();
        relay.submit("img-1", None, OcrMethod::Hybrid).await.unwrap();

        relay
            .on_progress("img-1", "preprocessing", Some("Reading image".to_string()), Some(30))
            .await;
        relay
            .on_progress("img-1", "extracting", None, Some(80))
            .await;
        relay
            .on_complete("img-1", true, Some(extraction("x + 2 = 7")), None)
            .await;

        let snapshot = relay.snapshot().await;
        assert!(!snapshot.in_progress());
        assert_eq!(snapshot.stage.as_deref(), Some("completed"));
        assert_eq!(snapshot.result.unwrap().text, "x + 2 = 7");
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn immediate_completion_is_a_valid_success_path() {
        // Cache hits complete with no intermediate progress at all.
        let (relay, _rx, _api) = relay();
        relay.submit("img-1", None, OcrMethod::Hybrid).await.unwrap();

        relay
            .on_complete("img-1", true, Some(extraction("cached")), None)
            .await;

        let snapshot = relay.snapshot().await;
        assert!(!snapshot.in_progress());
        assert_eq!(snapshot.result.unwrap().text, "cached");
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn failed_completion_surfaces_the_error() {
        let (relay, _rx, _api) = relay();
        relay.submit("img-1", None, OcrMethod::Gpt4o).await.unwrap();

        relay
            .on_complete("img-1", false, None, Some("OCR processing failed".to_string()))
            .await;

        let snapshot = relay.snapshot().await;
        assert!(!snapshot.in_progress());
        assert_eq!(snapshot.error.as_deref(), Some("OCR processing failed"));
    }

    #[tokio::test]
    async fn resubmission_supersedes_the_tracked_job() {
        let (relay, _rx, _api) = relay();
        relay.submit("job-a", None, OcrMethod::Hybrid).await.unwrap();
        relay.submit("job-b", None, OcrMethod::Hybrid).await.unwrap();

        // The old job's events are now stale.
        relay.on_progress("job-a", "extracting", None, Some(90)).await;
        relay
            .on_complete("job-a", true, Some(extraction("old")), None)
            .await;

        let snapshot = relay.snapshot().await;
        assert_eq!(snapshot.active_job.as_deref(), Some("job-b"));
        assert!(snapshot.result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_the_tracked_job() {
        let (relay, _rx, _api) = relay();
        relay.submit("img-1", None, OcrMethod::Hybrid).await.unwrap();

        sleep(JOB_TIMEOUT + Duration::from_secs(1)).await;

        let snapshot = relay.snapshot().await;
        assert!(!snapshot.in_progress());
        assert_eq!(snapshot.error.as_deref(), Some("OCR job timed out"));

        // A late completion for the timed-out job is stale, and a fresh
        // submission starts clean.
        relay
            .on_complete("img-1", true, Some(extraction("late")), None)
            .await;
        assert!(relay.snapshot().await.result.is_none());

        relay.submit("img-2", None, OcrMethod::Hybrid).await.unwrap();
        assert!(relay.snapshot().await.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_disarms_the_watchdog() {
        let (relay, _rx, _api) = relay();
        relay.submit("img-1", None, OcrMethod::Hybrid).await.unwrap();
        relay
            .on_complete("img-1", true, Some(extraction("done")), None)
            .await;

        sleep(JOB_TIMEOUT + Duration::from_secs(1)).await;
        let snapshot = relay.snapshot().await;
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.result.unwrap().text, "done");
    }

    #[tokio::test]
    async fn disconnected_submit_falls_back_to_http() {
        let (handle, mut rx) = disconnected_handle();
        let api = Arc::new(StubThreadApi::new());
        api.script_extraction(Ok(extraction("from http")));
        let relay = OcrRelay::new(handle, api.clone());

        relay
            .submit("img-9", Some("geometry"), OcrMethod::Pix2Text)
            .await
            .unwrap();

        // Nothing went over the channel; the REST port carried the job.
        assert!(drain_events(&mut rx).is_empty());
        let calls = api.extract_calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![(
                "img-9".to_string(),
                Some("geometry".to_string()),
                OcrMethod::Pix2Text
            )]
        );

        let snapshot = relay.snapshot().await;
        assert!(!snapshot.in_progress());
        assert_eq!(snapshot.result.unwrap().text, "from http");
    }

    #[tokio::test]
    async fn fallback_failure_returns_the_job_to_idle() {
        let (handle, _rx) = disconnected_handle();
        let api = Arc::new(StubThreadApi::new());
        api.script_extraction(Err("vision service unavailable".to_string()));
        let relay = OcrRelay::new(handle, api);

        let err = relay.submit("img-9", None, OcrMethod::Hybrid).await;
        assert!(matches!(err, Err(SyncError::AsyncTask(_))));

        let snapshot = relay.snapshot().await;
        assert!(!snapshot.in_progress());
        assert!(snapshot.error.is_some());
    }
}
