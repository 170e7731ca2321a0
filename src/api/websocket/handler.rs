// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! WebSocket transport: one connection is one chat session

use super::messages::{ErrorCode, IncomingMessage, OutgoingMessage, INVALID_MESSAGE_ERROR};
use super::session::{ChatSessionManager, ReplySink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound queue size per connection
const OUTBOUND_CAPACITY: usize = 256;

/// Replies queued for the connection's writer task
pub struct ChannelSink {
    tx: mpsc::Sender<OutgoingMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutgoingMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ReplySink for ChannelSink {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow!("connection closed"))
    }
}

pub async fn handle_websocket(socket: WebSocket, manager: Arc<ChatSessionManager>) {
    let session_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutgoingMessage>(OUTBOUND_CAPACITY);
    let sink = ChannelSink::new(tx);

    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(session_id = %writer_session, "Failed to serialize reply: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    manager.on_session_start(&session_id, &sink).await;

    // Messages of one session are handled one after another
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match IncomingMessage::parse(&text) {
                Ok(incoming) => {
                    manager
                        .on_message(&session_id, incoming.content(), &sink)
                        .await;
                }
                Err(e) => {
                    debug!(session_id = %session_id, "Rejected malformed message frame: {}", e);
                    let reply =
                        OutgoingMessage::error(ErrorCode::InvalidMessage, INVALID_MESSAGE_ERROR);
                    if sink.send(reply).await.is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(session_id = %session_id, "WebSocket receive error: {}", e);
                break;
            }
        }
    }

    manager.on_session_end(&session_id).await;
    drop(sink);
    let _ = writer.await;
}
