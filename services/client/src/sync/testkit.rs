//! services/client/src/sync/testkit.rs
//!
//! Scripted in-memory fakes behind the transport and REST ports, shared by
//! the component test modules.

use crate::sync::connection::{ChannelHandle, ConnectionState, ConnectionStatus};
use crate::sync::protocol::ClientEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tutor_chat_core::domain::{OcrExtraction, OcrMethod, Thread, ThreadSummary};
use tutor_chat_core::ports::{
    ChannelConnection, ChannelTransport, PortError, PortResult, ThreadApiService,
};
use uuid::Uuid;

//=========================================================================================
// Scripted Channel Transport
//=========================================================================================

/// A transport whose dials can be scripted to fail, and whose live session
/// can be fed server frames or killed from the test.
pub(crate) struct FakeTransport {
    fail_first: AtomicUsize,
    auto_pong: AtomicBool,
    dials: StdMutex<Vec<Instant>>,
    sent: Arc<StdMutex<Vec<String>>>,
    current: StdMutex<Option<mpsc::UnboundedSender<PortResult<String>>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            fail_first: AtomicUsize::new(0),
            auto_pong: AtomicBool::new(false),
            dials: StdMutex::new(Vec::new()),
            sent: Arc::new(StdMutex::new(Vec::new())),
            current: StdMutex::new(None),
        }
    }

    /// The first `n` dials are refused.
    pub fn fail_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Answer every ping frame with a pong, like a healthy server.
    pub fn auto_pong(self) -> Self {
        self.auto_pong.store(true, Ordering::SeqCst);
        self
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    pub fn dial_times(&self) -> Vec<Instant> {
        self.dials.lock().unwrap().clone()
    }

    /// All frames the client sent over any session, in order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Injects a server frame into the live session.
    pub fn push_server_frame(&self, frame: &str) {
        if let Some(tx) = self.current.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(frame.to_string()));
        }
    }

    /// Makes the live session fail with a transport error.
    pub fn fail_session(&self, reason: &str) {
        if let Some(tx) = self.current.lock().unwrap().as_ref() {
            let _ = tx.send(Err(PortError::Transport(reason.to_string())));
        }
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn dial(&self) -> PortResult<Box<dyn ChannelConnection>> {
        let attempt = {
            let mut dials = self.dials.lock().unwrap();
            dials.push(Instant::now());
            dials.len()
        };
        if attempt <= self.fail_first.load(Ordering::SeqCst) {
            return Err(PortError::Transport("dial refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock().unwrap() = Some(tx.clone());
        Ok(Box::new(FakeConnection {
            incoming: rx,
            loopback: tx,
            sent: self.sent.clone(),
            auto_pong: self.auto_pong.load(Ordering::SeqCst),
        }))
    }
}

struct FakeConnection {
    incoming: mpsc::UnboundedReceiver<PortResult<String>>,
    loopback: mpsc::UnboundedSender<PortResult<String>>,
    sent: Arc<StdMutex<Vec<String>>>,
    auto_pong: bool,
}

#[async_trait]
impl ChannelConnection for FakeConnection {
    async fn send(&mut self, frame: String) -> PortResult<()> {
        if self.auto_pong && frame.contains(r#""event":"ping""#) {
            let _ = self.loopback.send(Ok(r#"{"event":"pong"}"#.to_string()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<PortResult<String>> {
        self.incoming.recv().await
    }
}

//=========================================================================================
// Bare Channel Handles for Component Tests
//=========================================================================================

/// A handle whose outbound queue the test inspects directly, with the
/// connection state pinned to `Connected`.
pub(crate) fn connected_handle() -> (ChannelHandle, mpsc::Receiver<ClientEvent>) {
    handle_with_status(ConnectionStatus::Connected)
}

pub(crate) fn disconnected_handle() -> (ChannelHandle, mpsc::Receiver<ClientEvent>) {
    handle_with_status(ConnectionStatus::Disconnected)
}

fn handle_with_status(status: ConnectionStatus) -> (ChannelHandle, mpsc::Receiver<ClientEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let state = Arc::new(Mutex::new(ConnectionState {
        status,
        last_error: None,
        last_heartbeat_ack: None,
    }));
    (ChannelHandle::new(tx, state), rx)
}

/// Drains everything currently queued on the outbound side.
pub(crate) fn drain_events(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

//=========================================================================================
// Stub REST Port
//=========================================================================================

/// A scripted `ThreadApiService`, recording extract calls.
pub(crate) struct StubThreadApi {
    pub thread: StdMutex<Option<Thread>>,
    pub extraction: StdMutex<Option<Result<OcrExtraction, String>>>,
    pub extract_calls: StdMutex<Vec<(String, Option<String>, OcrMethod)>>,
}

impl StubThreadApi {
    pub fn new() -> Self {
        Self {
            thread: StdMutex::new(None),
            extraction: StdMutex::new(None),
            extract_calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_thread(thread: Thread) -> Self {
        let stub = Self::new();
        *stub.thread.lock().unwrap() = Some(thread);
        stub
    }

    pub fn script_extraction(&self, result: Result<OcrExtraction, String>) {
        *self.extraction.lock().unwrap() = Some(result);
    }
}

#[async_trait]
impl ThreadApiService for StubThreadApi {
    async fn list_threads(&self, _limit: usize) -> PortResult<Vec<ThreadSummary>> {
        Ok(Vec::new())
    }

    async fn get_thread(&self, thread_id: Uuid) -> PortResult<Thread> {
        self.thread
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PortError::NotFound(format!("thread {}", thread_id)))
    }

    async fn delete_thread(&self, _thread_id: Uuid) -> PortResult<()> {
        Ok(())
    }

    async fn extract_text(
        &self,
        image_id: &str,
        subject: Option<&str>,
        method: OcrMethod,
    ) -> PortResult<OcrExtraction> {
        self.extract_calls.lock().unwrap().push((
            image_id.to_string(),
            subject.map(str::to_string),
            method,
        ));
        match self.extraction.lock().unwrap().clone() {
            Some(Ok(extraction)) => Ok(extraction),
            Some(Err(reason)) => Err(PortError::Unexpected(reason)),
            None => Err(PortError::Unexpected("no scripted extraction".to_string())),
        }
    }
}
