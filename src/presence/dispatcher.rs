use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use super::hub::ObserverSink;
use super::lifecycle::Handshake;
use super::participant::{ConnectionId, Participant};
use super::protocol::InboundMessage;
use super::service::{PresenceService, PresenceStats};
use crate::error::{PresenceError, Result};

enum HubCommand {
    Connect {
        connection: ConnectionId,
        handshake: Handshake,
        sink: Box<dyn ObserverSink>,
    },
    Message {
        connection: ConnectionId,
        message: InboundMessage,
    },
    Disconnect {
        connection: ConnectionId,
    },
    Activity(Map<String, Value>),
    Snapshot(oneshot::Sender<Vec<Participant>>),
    Stats(oneshot::Sender<PresenceStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable entry point to the presence dispatcher.
///
/// The dispatcher task owns the [`PresenceService`] and applies commands strictly
/// in arrival order, one at a time.
#[derive(Clone)]
pub struct PresenceHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    next_connection: Arc<AtomicU64>,
}

impl PresenceHandle {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn spawn(service: PresenceService) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(service, rx));

        Self {
            commands: tx,
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate the id for a new connection. Ids only ever grow.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    pub fn connect(&self, connection: ConnectionId, handshake: Handshake, sink: Box<dyn ObserverSink>) -> Result<()> {
        self.send(HubCommand::Connect {
            connection,
            handshake,
            sink,
        })
    }

    pub fn message(&self, connection: ConnectionId, message: InboundMessage) -> Result<()> {
        self.send(HubCommand::Message { connection, message })
    }

    pub fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        self.send(HubCommand::Disconnect { connection })
    }

    pub fn relay_activity(&self, activity: Map<String, Value>) -> Result<()> {
        self.send(HubCommand::Activity(activity))
    }

    pub async fn snapshot(&self) -> Result<Vec<Participant>> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot(tx))?;
        rx.await.map_err(|_| PresenceError::DispatcherUnavailable)
    }

    pub async fn stats(&self) -> Result<PresenceStats> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Stats(tx))?;
        rx.await.map_err(|_| PresenceError::DispatcherUnavailable)
    }

    /// Clear all presence state and stop the dispatcher.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Shutdown(tx))?;
        rx.await.map_err(|_| PresenceError::DispatcherUnavailable)
    }

    fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PresenceError::DispatcherUnavailable)
    }
}

async fn run_dispatcher(mut service: PresenceService, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
    tracing::info!("Presence dispatcher started");

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Connect {
                connection,
                handshake,
                sink,
            } => service.connect(connection, handshake, sink),
            HubCommand::Message { connection, message } => service.handle_message(connection, message),
            HubCommand::Disconnect { connection } => service.disconnect(connection),
            HubCommand::Activity(activity) => {
                service.relay_activity(activity);
            }
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(service.snapshot());
            }
            HubCommand::Stats(reply) => {
                let _ = reply.send(service.stats());
            }
            HubCommand::Shutdown(reply) => {
                service.shutdown();
                let _ = reply.send(());
                tracing::info!("Presence dispatcher stopped");
                return;
            }
        }
    }

    service.shutdown();
    tracing::info!("Presence dispatcher stopped, all handles dropped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::presence::hub::testing::CollectingSink;
    use crate::presence::session::SessionStatus;
    use serde_json::json;

    fn spawn() -> PresenceHandle {
        PresenceHandle::spawn(PresenceService::new(Box::new(StaticDirectory::empty())))
    }

    fn student(id: &str) -> Handshake {
        Handshake {
            user_id: Some(id.to_string()),
            user_name: Some(format!("Student {}", id)),
            ..Handshake::default()
        }
    }

    #[tokio::test]
    async fn test_connection_ids_increase() {
        let handle = spawn();
        let first = handle.next_connection_id();
        let second = handle.clone().next_connection_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_commands_apply_in_order() {
        let handle = spawn();
        let conn = handle.next_connection_id();
        handle.connect(conn, student("s1"), Box::new(CollectingSink::new())).unwrap();

        let started = serde_json::from_value(json!({
            "event": "test_started",
            "data": { "studentId": "s1", "testTitle": "Quiz1" }
        }))
        .unwrap();
        handle.message(conn, started).unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot[0].status,
            SessionStatus::Testing {
                current_test_title: "Quiz1".to_string()
            }
        );

        handle.disconnect(conn).unwrap();
        assert!(handle.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activity_relay_and_stats() {
        let handle = spawn();
        let admin = CollectingSink::new();
        handle
            .connect(handle.next_connection_id(), Handshake::anonymous(), Box::new(admin.clone()))
            .unwrap();

        let mut activity = Map::new();
        activity.insert("activity".to_string(), json!("student_login"));
        handle.relay_activity(activity).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.observers, 1);
        assert_eq!(stats.participants, 0);
        assert_eq!(admin.count("activity_update"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatcher() {
        let handle = spawn();
        handle
            .connect(handle.next_connection_id(), student("s1"), Box::new(CollectingSink::new()))
            .unwrap();

        handle.shutdown().await.unwrap();

        let result = handle.snapshot().await;
        assert!(matches!(result, Err(PresenceError::DispatcherUnavailable)));
    }
}
