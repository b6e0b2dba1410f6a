use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use warp::ws::{Message, WebSocket};

use crate::error::{PresenceError, Result};
use crate::presence::protocol::InboundMessage;
use crate::presence::{ConnectionId, Handshake, ObserverSink, PresenceHandle};

/// Longest slice of a bad frame echoed into the logs
const LOGGED_FRAME_LIMIT: usize = 256;

/// Keepalive policy for presence sockets.
#[derive(Debug, Clone, Copy)]
pub struct SocketSettings {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

/// Outbound half of a socket, handed to the broadcast hub.
struct SocketSink {
    connection: ConnectionId,
    sender: mpsc::UnboundedSender<Message>,
}

impl ObserverSink for SocketSink {
    fn deliver(&self, frame: &str) -> Result<()> {
        self.sender
            .send(Message::text(frame))
            .map_err(|_| PresenceError::ObserverGone(self.connection))
    }
}

pub async fn handle_presence_websocket(
    websocket: WebSocket,
    handle: PresenceHandle,
    handshake: Handshake,
    settings: SocketSettings,
) {
    let connection = handle.next_connection_id();
    tracing::info!(connection_id = %connection, "Presence WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Drains queued frames until every sender (ours and the hub's) is gone
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::debug!(connection_id = %connection, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let sink = SocketSink {
        connection,
        sender: tx.clone(),
    };
    if let Err(e) = handle.connect(connection, handshake, Box::new(sink)) {
        tracing::error!(connection_id = %connection, error = %e, "Cannot attach connection");
        sender_task.abort();
        return;
    }

    let mut ping = interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(message)) => {
                    last_seen = Instant::now();
                    if message.is_close() {
                        break;
                    }
                    handle_websocket_message(&handle, connection, message);
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if last_seen.elapsed() >= settings.ping_timeout {
                    tracing::info!(connection_id = %connection, "WebSocket idle past ping timeout, closing");
                    break;
                }
                if tx.send(Message::ping(Vec::new())).is_err() {
                    break;
                }
            }
        }
    }

    if let Err(e) = handle.disconnect(connection) {
        tracing::warn!(connection_id = %connection, error = %e, "Failed to detach connection");
    }
    drop(tx);
    tracing::info!(connection_id = %connection, "Presence WebSocket connection closed");
}

fn handle_websocket_message(handle: &PresenceHandle, connection: ConnectionId, message: Message) {
    let Ok(text) = message.to_str() else {
        if message.is_binary() {
            tracing::debug!(connection_id = %connection, "Ignoring binary frame");
        }
        return;
    };

    match InboundMessage::parse(text) {
        Ok(inbound) => {
            tracing::trace!(connection_id = %connection, participant_id = %inbound.student_id(), "Inbound event");
            if let Err(e) = handle.message(connection, inbound) {
                tracing::warn!(connection_id = %connection, error = %e, "Failed to dispatch inbound event");
            }
        }
        Err(e) => {
            tracing::warn!(
                connection_id = %connection,
                error = %e,
                raw_message = %truncate(text, LOGGED_FRAME_LIMIT),
                "Failed to parse presence message"
            );
        }
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
