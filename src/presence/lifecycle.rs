use std::collections::HashMap;

use super::hub::ObserverSink;
use super::participant::{ConnectionId, Role};
use super::service::{ConnectionContext, PresenceService};

/// Identity a client presents when it opens its socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub role: Role,
    pub group_code: Option<String>,
}

impl Handshake {
    /// Read `userId`, `userName`, `role` and `groupCode` from query parameters.
    /// Blank values count as missing.
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        let field = |key: &str| {
            params
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            user_id: field("userId"),
            user_name: field("userName"),
            role: field("role").map(|raw| Role::parse(&raw)).unwrap_or_default(),
            group_code: field("groupCode"),
        }
    }

    /// A connection that only watches.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl PresenceService {
    /// Attach a new connection. Every connection observes; one that names a
    /// user id is also registered as a participant.
    pub fn connect(&mut self, connection: ConnectionId, handshake: Handshake, sink: Box<dyn ObserverSink>) {
        self.hub.add_observer(connection, sink);

        let Some(id) = handshake.user_id else {
            tracing::debug!(connection_id = %connection, "Anonymous observer connected");
            self.connections.insert(connection, ConnectionContext { participant_id: None });
            return;
        };

        let display_name = handshake
            .user_name
            .or_else(|| self.directory.resolve(&id))
            .unwrap_or_else(|| id.clone());

        tracing::info!(
            connection_id = %connection,
            participant_id = %id,
            role = ?handshake.role,
            group_code = ?handshake.group_code,
            "Participant connected"
        );

        self.connections.insert(
            connection,
            ConnectionContext {
                participant_id: Some(id.clone()),
            },
        );
        self.register(id, display_name, handshake.role, handshake.group_code, connection);
    }

    /// Detach a connection. Its participant disappears at once, even mid-test,
    /// unless a newer connection has taken the id over.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.hub.remove_observer(connection);

        let Some(context) = self.connections.remove(&connection) else {
            return;
        };
        let Some(id) = context.participant_id else {
            tracing::debug!(connection_id = %connection, "Anonymous observer disconnected");
            return;
        };

        let owned = self
            .registry
            .get(&id)
            .is_some_and(|participant| participant.connection == connection);

        if owned {
            self.deregister(&id);
            tracing::info!(connection_id = %connection, participant_id = %id, "Participant disconnected");
        } else {
            tracing::debug!(
                connection_id = %connection,
                participant_id = %id,
                "Superseded connection closed, keeping newer entry"
            );
            self.hub.broadcast_presence(&self.registry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::presence::hub::testing::CollectingSink;
    use crate::presence::protocol::InboundMessage;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn service_with_directory(names: &[(&str, &str)]) -> PresenceService {
        let names = names.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        PresenceService::new(Box::new(StaticDirectory::new(names)))
    }

    #[test]
    fn test_handshake_from_full_query() {
        let handshake = Handshake::from_query(&query(&[
            ("userId", "s1"),
            ("userName", "Ali"),
            ("role", "admin"),
            ("groupCode", "G1"),
        ]));

        assert_eq!(handshake.user_id.as_deref(), Some("s1"));
        assert_eq!(handshake.user_name.as_deref(), Some("Ali"));
        assert_eq!(handshake.role, Role::Admin);
        assert_eq!(handshake.group_code.as_deref(), Some("G1"));
    }

    #[test]
    fn test_handshake_blank_id_is_anonymous() {
        let handshake = Handshake::from_query(&query(&[("userId", "  "), ("userName", "Nobody")]));
        assert_eq!(handshake.user_id, None);
        assert_eq!(handshake.role, Role::Student);
    }

    #[test]
    fn test_anonymous_connection_observes_but_is_not_listed() {
        let mut service = service_with_directory(&[]);
        let anon = CollectingSink::new();
        service.connect(ConnectionId::new(1), Handshake::anonymous(), Box::new(anon.clone()));

        assert!(anon.frames().is_empty());
        assert!(service.snapshot().is_empty());

        service.connect(
            ConnectionId::new(2),
            Handshake::from_query(&query(&[("userId", "s1")])),
            Box::new(CollectingSink::new()),
        );
        let list = anon.last("online_students").unwrap();
        assert_eq!(list.as_array().unwrap().len(), 1);

        service.disconnect(ConnectionId::new(1));
        assert_eq!(service.stats().observers, 1);
    }

    #[test]
    fn test_display_name_resolution_order() {
        let mut service = service_with_directory(&[("s1", "Ali Valiyev"), ("s2", "Bobur")]);

        service.connect(
            ConnectionId::new(1),
            Handshake::from_query(&query(&[("userId", "s1"), ("userName", "Ali")])),
            Box::new(CollectingSink::new()),
        );
        service.connect(
            ConnectionId::new(2),
            Handshake::from_query(&query(&[("userId", "s2")])),
            Box::new(CollectingSink::new()),
        );
        service.connect(
            ConnectionId::new(3),
            Handshake::from_query(&query(&[("userId", "s3")])),
            Box::new(CollectingSink::new()),
        );

        assert_eq!(service.get("s1").unwrap().display_name, "Ali");
        assert_eq!(service.get("s2").unwrap().display_name, "Bobur");
        assert_eq!(service.get("s3").unwrap().display_name, "s3");
    }

    #[test]
    fn test_disconnect_mid_test_removes_participant() {
        let mut service = service_with_directory(&[]);
        let admin = CollectingSink::new();
        service.connect(ConnectionId::new(0), Handshake::anonymous(), Box::new(admin.clone()));
        service.connect(
            ConnectionId::new(1),
            Handshake::from_query(&query(&[("userId", "s1")])),
            Box::new(CollectingSink::new()),
        );
        service.set_testing("s1", "Quiz1");

        service.disconnect(ConnectionId::new(1));

        assert!(service.get("s1").is_none());
        let list = admin.last("online_students").unwrap();
        assert!(list.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_superseded_disconnect_keeps_new_entry() {
        let mut service = service_with_directory(&[]);
        let admin = CollectingSink::new();
        service.connect(ConnectionId::new(0), Handshake::anonymous(), Box::new(admin.clone()));
        let s1 = Handshake::from_query(&query(&[("userId", "s1")]));
        service.connect(ConnectionId::new(1), s1.clone(), Box::new(CollectingSink::new()));
        service.connect(ConnectionId::new(2), s1, Box::new(CollectingSink::new()));
        admin.reset();

        service.disconnect(ConnectionId::new(1));

        assert_eq!(service.get("s1").unwrap().connection, ConnectionId::new(2));
        assert_eq!(admin.count("online_students"), 1);
        assert_eq!(admin.last("online_students").unwrap()[0]["id"], "s1");

        service.disconnect(ConnectionId::new(2));
        assert!(service.get("s1").is_none());
    }

    #[test]
    fn test_late_connect_from_older_connection_keeps_newer_owner() {
        let mut service = service_with_directory(&[]);
        let s1 = Handshake::from_query(&query(&[("userId", "s1")]));
        service.connect(ConnectionId::new(5), s1.clone(), Box::new(CollectingSink::new()));
        service.connect(ConnectionId::new(4), s1, Box::new(CollectingSink::new()));

        assert_eq!(service.get("s1").unwrap().connection, ConnectionId::new(5));

        let started = InboundMessage::parse(
            r#"{"event":"test_started","data":{"studentId":"s1","testTitle":"Quiz1"}}"#,
        )
        .unwrap();
        service.handle_message(ConnectionId::new(5), started);
        assert_eq!(service.get("s1").unwrap().current_test_title(), Some("Quiz1"));

        service.disconnect(ConnectionId::new(4));
        assert_eq!(service.get("s1").unwrap().connection, ConnectionId::new(5));
    }

    #[test]
    fn test_disconnect_unknown_connection_is_noop() {
        let mut service = service_with_directory(&[]);
        let admin = CollectingSink::new();
        service.connect(ConnectionId::new(0), Handshake::anonymous(), Box::new(admin.clone()));

        service.disconnect(ConnectionId::new(42));
        assert!(admin.frames().is_empty());
        assert_eq!(service.stats().observers, 1);
    }
}
