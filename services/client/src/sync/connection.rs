//! services/client/src/sync/connection.rs
//!
//! Owns the lifecycle of the one logical channel to the tutoring service:
//! dialing, reconnection backoff, heartbeat staleness detection, and the
//! observable connection status. All other components talk to the channel
//! through a `ChannelHandle` and never command the transport directly.

use crate::error::SyncError;
use crate::sync::protocol::{self, ClientEvent, ServerEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tutor_chat_core::ports::{ChannelConnection, ChannelTransport};

/// Interval between heartbeat pings on an established session.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
/// A session with no pong for longer than this is treated as stale.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(35);

/// Delays before consecutive redial attempts, then capped.
const RECONNECT_DELAYS_SECS: [u64; 4] = [1, 2, 4, 8];
const RECONNECT_DELAY_CAP_SECS: u64 = 30;

const OUTBOUND_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 256;

//=========================================================================================
// Observable Connection State
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// The connection state consumers may read but never write.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_heartbeat_ack: Option<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_error: None,
            last_heartbeat_ack: None,
        }
    }
}

//=========================================================================================
// ChannelHandle (Shared With All Consumers)
//=========================================================================================

/// A cheap, cloneable handle to the channel: an outbound event queue plus
/// read-only access to the connection state.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<ClientEvent>,
    state: Arc<Mutex<ConnectionState>>,
}

impl ChannelHandle {
    pub(crate) fn new(outbound: mpsc::Sender<ClientEvent>, state: Arc<Mutex<ConnectionState>>) -> Self {
        Self { outbound, state }
    }

    pub async fn snapshot(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.lock().await.status
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await == ConnectionStatus::Connected
    }

    /// Queues an event for delivery. Events queued while the channel is down
    /// are flushed once a session is re-established; they are lost only on
    /// explicit teardown.
    pub async fn emit(&self, event: ClientEvent) -> Result<(), SyncError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| SyncError::Connection("channel has been torn down".to_string()))
    }
}

//=========================================================================================
// ConnectionManager
//=========================================================================================

/// Manages the single channel worker task. `initialize` is idempotent; the
/// worker redials forever with bounded backoff until `teardown`.
pub struct ConnectionManager {
    transport: Arc<dyn ChannelTransport>,
    state: Arc<Mutex<ConnectionState>>,
    outbound_tx: mpsc::Sender<ClientEvent>,
    outbound_rx: Option<mpsc::Receiver<ClientEvent>>,
    inbound_tx: Option<mpsc::Sender<ServerEvent>>,
    inbound_rx: Option<mpsc::Receiver<ServerEvent>>,
    reconnect: Arc<Notify>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        Self {
            transport,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
            reconnect: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            worker: None,
        }
    }

    /// Takes the inbound event stream. The dispatch engine consumes it;
    /// it closes when the manager is torn down.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.inbound_rx.take()
    }

    /// Idempotent: the first call spawns the channel worker, subsequent calls
    /// just return another handle to the same channel.
    pub fn initialize(&mut self) -> ChannelHandle {
        if self.worker.is_none() {
            if let (Some(outbound_rx), Some(inbound_tx)) =
                (self.outbound_rx.take(), self.inbound_tx.take())
            {
                let worker = tokio::spawn(run_channel(
                    self.transport.clone(),
                    self.state.clone(),
                    outbound_rx,
                    inbound_tx,
                    self.reconnect.clone(),
                    self.shutdown.clone(),
                ));
                self.worker = Some(worker);
            }
        }
        self.handle()
    }

    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle::new(self.outbound_tx.clone(), self.state.clone())
    }

    /// Drops the current session (or any backoff wait) and redials now.
    /// Safe to call repeatedly; there is only ever one worker, so no
    /// duplicate channels can be created.
    pub async fn reconnect(&self) {
        {
            let mut st = self.state.lock().await;
            st.status = ConnectionStatus::Connecting;
        }
        self.reconnect.notify_waiters();
    }

    /// Cancels the worker and all of its timers. The inbound event stream
    /// closes, which in turn ends the dispatch engine.
    pub async fn teardown(&mut self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

//=========================================================================================
// The Channel Worker
//=========================================================================================

enum SessionEnd {
    Shutdown,
    ReconnectRequested,
    Lost(String),
}

fn reconnect_delay(failures: u32) -> Duration {
    let secs = RECONNECT_DELAYS_SECS
        .get(failures as usize - 1)
        .copied()
        .unwrap_or(RECONNECT_DELAY_CAP_SECS);
    Duration::from_secs(secs)
}

/// The dial loop: establishes sessions forever, backing off between failed
/// attempts, until shutdown. Connection loss is never fatal.
async fn run_channel(
    transport: Arc<dyn ChannelTransport>,
    state: Arc<Mutex<ConnectionState>>,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    inbound_tx: mpsc::Sender<ServerEvent>,
    reconnect: Arc<Notify>,
    shutdown: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        if failures > 0 {
            let delay = reconnect_delay(failures);
            debug!("Redialing channel in {:?} (attempt {}).", delay, failures + 1);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = reconnect.notified() => {
                    debug!("Manual reconnect requested; skipping backoff delay.");
                }
                _ = shutdown.cancelled() => break,
            }
        }
        {
            let mut st = state.lock().await;
            st.status = ConnectionStatus::Connecting;
        }
        match transport.dial().await {
            Ok(conn) => {
                failures = 0;
                {
                    let mut st = state.lock().await;
                    st.status = ConnectionStatus::Connected;
                    st.last_error = None;
                    st.last_heartbeat_ack = Some(Instant::now());
                }
                info!("Channel established.");
                let ended = drive_session(
                    conn,
                    &state,
                    &mut outbound_rx,
                    &inbound_tx,
                    &reconnect,
                    &shutdown,
                )
                .await;
                {
                    let mut st = state.lock().await;
                    st.status = ConnectionStatus::Disconnected;
                    if let SessionEnd::Lost(reason) = &ended {
                        st.last_error = Some(reason.clone());
                    }
                }
                match ended {
                    SessionEnd::Shutdown => break,
                    SessionEnd::ReconnectRequested => {
                        info!("Reconnect requested; redialing.");
                    }
                    SessionEnd::Lost(reason) => {
                        warn!("Channel session ended: {}", reason);
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!("Failed to dial channel: {}", e);
                let mut st = state.lock().await;
                st.status = ConnectionStatus::Disconnected;
                st.last_error = Some(e.to_string());
            }
        }
    }
    let mut st = state.lock().await;
    st.status = ConnectionStatus::Disconnected;
}

/// Drives one established session: multiplexes outbound events, inbound
/// frames, the heartbeat, manual reconnect requests, and shutdown.
async fn drive_session(
    mut conn: Box<dyn ChannelConnection>,
    state: &Arc<Mutex<ConnectionState>>,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    inbound_tx: &mpsc::Sender<ServerEvent>,
    reconnect: &Notify,
    shutdown: &CancellationToken,
) -> SessionEnd {
    let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
            _ = reconnect.notified() => return SessionEnd::ReconnectRequested,
            _ = heartbeat.tick() => {
                // Staleness first: a session that looks open but has stopped
                // answering pings is a zombie and must be redialed.
                let stale = {
                    let st = state.lock().await;
                    st.last_heartbeat_ack
                        .map(|ack| ack.elapsed() > HEARTBEAT_TIMEOUT)
                        .unwrap_or(true)
                };
                if stale {
                    return SessionEnd::Lost("heartbeat timed out; connection is stale".to_string());
                }
                match protocol::encode(&ClientEvent::Ping) {
                    Ok(frame) => {
                        if let Err(e) = conn.send(frame).await {
                            return SessionEnd::Lost(format!("ping failed: {}", e));
                        }
                    }
                    Err(e) => error!("Failed to encode ping frame: {}", e),
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(event) => match protocol::encode(&event) {
                        Ok(frame) => {
                            if let Err(e) = conn.send(frame).await {
                                return SessionEnd::Lost(format!("send failed: {}", e));
                            }
                        }
                        Err(e) => error!("Failed to encode outgoing event: {}", e),
                    },
                    // Every handle has been dropped; nothing left to deliver.
                    None => return SessionEnd::Shutdown,
                }
            }
            incoming = conn.recv() => {
                match incoming {
                    Some(Ok(frame)) => match protocol::decode(&frame) {
                        Ok(ServerEvent::Pong) => {
                            let mut st = state.lock().await;
                            st.last_heartbeat_ack = Some(Instant::now());
                        }
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                // The dispatch engine is gone.
                                return SessionEnd::Shutdown;
                            }
                        }
                        Err(e) => warn!("Ignoring unparseable channel frame: {}", e),
                    },
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("channel closed by server".to_string()),
                }
            }
        }
    }
}
