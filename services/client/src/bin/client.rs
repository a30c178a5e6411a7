//! services/client/src/bin/client.rs
//!
//! Headless wiring for the sync engine: connects the channel, runs the
//! dispatch loop, and turns stdin lines into student messages.

use client_lib::{
    adapters::{RestApiAdapter, WsTransport},
    config::Config,
    error::SyncError,
    sync::{ConnectionManager, MessageSynchronizer, OcrRelay, SyncEngine, ValidationCoordinator},
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Connecting to {}", config.server_url);

    // --- 2. Initialize the Transport Adapters ---
    let api = Arc::new(RestApiAdapter::new(&config.server_url)?);
    let transport = Arc::new(WsTransport::new(config.channel_url()));

    // --- 3. Bring Up the Channel ---
    let mut connection = ConnectionManager::new(transport);
    let events = connection
        .take_events()
        .ok_or_else(|| SyncError::Internal("event stream already taken".to_string()))?;
    let channel = connection.initialize();

    // --- 4. Build the Components & Run the Engine ---
    let messages = Arc::new(MessageSynchronizer::new(channel.clone(), api.clone()));
    let validation = Arc::new(ValidationCoordinator::new(channel.clone()));
    let ocr = Arc::new(OcrRelay::new(channel, api));

    let engine = SyncEngine::new(events, messages.clone(), validation.clone(), ocr.clone());
    let engine_task = tokio::spawn(engine.run());

    // --- 5. Read Student Input Until EOF or Ctrl-C ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down.");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let content = line.trim();
                    if content.is_empty() {
                        continue;
                    }
                    if let Err(e) = messages.send(content).await {
                        warn!("Send failed: {}", e);
                    }
                }
                Ok(None) => {
                    info!("Input closed. Shutting down.");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    }

    // --- 6. Teardown ---
    messages.teardown().await;
    validation.teardown().await;
    ocr.teardown().await;
    connection.teardown().await;
    let _ = engine_task.await;

    Ok(())
}
