use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::hub::BroadcastHub;
use super::participant::{ConnectionId, Participant, Role};
use super::protocol::{InboundMessage, ScreenFrame, StatusUpdate, TestStarted, TestSubmitted};
use super::registry::ConnectionRegistry;
use crate::directory::UserDirectory;

/// What a live connection registered as, if anything.
pub(super) struct ConnectionContext {
    pub(super) participant_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceStats {
    pub connections: usize,
    pub observers: usize,
    pub participants: usize,
}

/// Presence state for the whole process: participants, observers and the
/// connections that own them. Every method runs to completion before the next
/// one starts, so each broadcast sees the registry exactly as the triggering
/// mutation left it.
pub struct PresenceService {
    pub(super) registry: ConnectionRegistry,
    pub(super) hub: BroadcastHub,
    pub(super) directory: Box<dyn UserDirectory>,
    pub(super) connections: HashMap<ConnectionId, ConnectionContext>,
}

impl PresenceService {
    pub fn new(directory: Box<dyn UserDirectory>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            hub: BroadcastHub::new(),
            directory,
            connections: HashMap::new(),
        }
    }

    /// Insert or replace `id` as an online participant and publish the new list.
    pub fn register(
        &mut self,
        id: String,
        display_name: String,
        role: Role,
        group_code: Option<String>,
        connection: ConnectionId,
    ) {
        self.registry.register(id, display_name, role, group_code, connection);
        self.hub.broadcast_presence(&self.registry);
    }

    /// Remove `id` and publish the new list. The list goes out even when `id`
    /// was not registered.
    pub fn deregister(&mut self, id: &str) -> Option<Participant> {
        let removed = self.registry.deregister(id);
        self.hub.broadcast_presence(&self.registry);
        removed
    }

    /// Unknown ids are ignored without any broadcast.
    pub fn set_testing(&mut self, id: &str, test_title: &str) -> bool {
        let applied = self.registry.set_testing(id, test_title);
        if applied {
            self.hub.broadcast_presence(&self.registry);
        }
        applied
    }

    /// Unknown ids are ignored without any broadcast.
    pub fn set_online(&mut self, id: &str) -> bool {
        let applied = self.registry.set_online(id);
        if applied {
            self.hub.broadcast_presence(&self.registry);
        }
        applied
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.registry.get(id)
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.registry.snapshot()
    }

    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            connections: self.connections.len(),
            observers: self.hub.observer_count(),
            participants: self.registry.len(),
        }
    }

    /// Route one inbound frame from `connection`.
    pub fn handle_message(&mut self, connection: ConnectionId, message: InboundMessage) {
        match message {
            InboundMessage::TestStarted(event) => self.on_test_started(connection, event),
            InboundMessage::TestSubmitted(event) => self.on_test_submitted(connection, event),
            InboundMessage::ScreenUpdate(frame) => self.on_screen_update(frame),
        }
    }

    /// Relay an activity record from the record store to every observer.
    pub fn relay_activity(&self, activity: Map<String, Value>) -> usize {
        self.hub.broadcast_activity(activity)
    }

    /// Drop every participant and observer.
    pub fn shutdown(&mut self) {
        tracing::info!(
            participants = self.registry.len(),
            connections = self.connections.len(),
            "Clearing presence state"
        );
        self.registry.clear();
        self.hub.clear();
        self.connections.clear();
    }

    fn on_test_started(&mut self, connection: ConnectionId, event: TestStarted) {
        if self.is_superseded(connection, &event.student_id) {
            return;
        }
        if !self.registry.set_testing(&event.student_id, event.test_title.as_str()) {
            tracing::debug!(participant_id = %event.student_id, "Ignoring test_started for unknown participant");
            return;
        }

        tracing::info!(
            participant_id = %event.student_id,
            test_title = %event.test_title,
            "Participant started a test"
        );
        self.hub.broadcast_status_change(StatusUpdate::testing(&event));
        self.hub.broadcast_presence(&self.registry);
    }

    fn on_test_submitted(&mut self, connection: ConnectionId, event: TestSubmitted) {
        if self.is_superseded(connection, &event.student_id) {
            return;
        }
        if !self.registry.set_online(&event.student_id) {
            tracing::debug!(participant_id = %event.student_id, "Ignoring test_submitted for unknown participant");
            return;
        }

        tracing::info!(participant_id = %event.student_id, "Participant submitted a test");
        self.hub.broadcast_status_change(StatusUpdate::finished(&event));
        self.hub.broadcast_submission(event);
        self.hub.broadcast_presence(&self.registry);
    }

    fn on_screen_update(&self, frame: ScreenFrame) {
        self.hub.relay_ephemeral(frame);
    }

    /// True when `connection` registered `participant_id` but a newer connection
    /// has since taken the id over.
    fn is_superseded(&self, connection: ConnectionId, participant_id: &str) -> bool {
        let owns_id = self
            .connections
            .get(&connection)
            .and_then(|context| context.participant_id.as_deref())
            == Some(participant_id);
        let current = self.registry.get(participant_id).map(|p| p.connection);

        let superseded = owns_id && current.is_some_and(|current| current != connection);
        if superseded {
            tracing::debug!(
                participant_id = %participant_id,
                connection_id = %connection,
                "Dropping event from superseded connection"
            );
        }
        superseded
    }
}
