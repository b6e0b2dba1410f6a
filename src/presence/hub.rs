use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::participant::ConnectionId;
use super::protocol::{OutboundMessage, ScreenFrame, StatusUpdate, TestSubmitted};
use super::registry::ConnectionRegistry;
use crate::error::Result;

/// Outbound half of an observer connection.
pub trait ObserverSink: Send {
    /// Queue one serialized frame. Must not block.
    fn deliver(&self, frame: &str) -> Result<()>;
}

/// Fans every outbound event out to all connected observers.
///
/// Delivery is best-effort and at-most-once: a failed send is logged and dropped,
/// and the observer stays in the set until its connection closes.
#[derive(Default)]
pub struct BroadcastHub {
    observers: BTreeMap<ConnectionId, Box<dyn ObserverSink>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, connection: ConnectionId, sink: Box<dyn ObserverSink>) {
        if self.observers.insert(connection, sink).is_some() {
            tracing::warn!(connection_id = %connection, "Observer registered twice, replacing sink");
        }
    }

    pub fn remove_observer(&mut self, connection: ConnectionId) -> bool {
        self.observers.remove(&connection).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    /// Send the full participant list.
    pub fn broadcast_presence(&self, registry: &ConnectionRegistry) -> usize {
        self.publish(&OutboundMessage::OnlineStudents(registry.snapshot()))
    }

    pub fn broadcast_status_change(&self, update: StatusUpdate) -> usize {
        self.publish(&OutboundMessage::StudentStatusUpdate(update))
    }

    /// Forward a screen frame as-is. Lost frames are superseded by the next one.
    pub fn relay_ephemeral(&self, frame: ScreenFrame) -> usize {
        self.publish(&OutboundMessage::ScreenMirrorUpdate(frame))
    }

    pub fn broadcast_submission(&self, submission: TestSubmitted) -> usize {
        self.publish(&OutboundMessage::TestSubmission(submission))
    }

    pub fn broadcast_activity(&self, activity: Map<String, Value>) -> usize {
        self.publish(&OutboundMessage::ActivityUpdate(activity))
    }

    /// Serialize once, deliver to every observer. Returns the number of successful sends.
    fn publish(&self, message: &OutboundMessage) -> usize {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = message.event_name(), error = %e, "Failed to serialize outbound event");
                return 0;
            }
        };

        let mut delivered = 0;
        for (connection, sink) in &self.observers {
            match sink.deliver(&frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection,
                        event = message.event_name(),
                        error = %e,
                        "Dropped outbound event"
                    );
                }
            }
        }

        tracing::trace!(
            event = message.event_name(),
            observers = self.observers.len(),
            delivered,
            "Broadcast event"
        );
        delivered
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use serde_json::Value;

    use super::ObserverSink;
    use crate::error::{PresenceError, Result};
    use crate::presence::participant::ConnectionId;

    /// In-memory observer recording every frame it receives.
    #[derive(Clone, Default)]
    pub struct CollectingSink {
        frames: Arc<Mutex<Vec<Value>>>,
        failing: Option<ConnectionId>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// A sink whose sends always fail, as if the peer vanished.
        pub fn failing(connection: ConnectionId) -> Self {
            Self {
                frames: Arc::default(),
                failing: Some(connection),
            }
        }

        pub fn frames(&self) -> Vec<Value> {
            self.frames.lock().unwrap().clone()
        }

        pub fn events(&self) -> Vec<String> {
            self.frames()
                .iter()
                .map(|frame| frame["event"].as_str().unwrap_or_default().to_string())
                .collect()
        }

        pub fn last(&self, event: &str) -> Option<Value> {
            self.frames()
                .into_iter()
                .rev()
                .find(|frame| frame["event"] == event)
                .map(|frame| frame["data"].clone())
        }

        pub fn count(&self, event: &str) -> usize {
            self.events().iter().filter(|name| name.as_str() == event).count()
        }

        pub fn reset(&self) {
            self.frames.lock().unwrap().clear();
        }
    }

    impl ObserverSink for CollectingSink {
        fn deliver(&self, frame: &str) -> Result<()> {
            if let Some(connection) = self.failing {
                return Err(PresenceError::ObserverGone(connection));
            }
            let value = serde_json::from_str(frame)?;
            self.frames.lock().unwrap().push(value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CollectingSink;
    use super::*;
    use crate::presence::participant::Role;
    use serde_json::json;

    fn hub_with(sinks: &[CollectingSink]) -> BroadcastHub {
        let mut hub = BroadcastHub::new();
        for (n, sink) in sinks.iter().enumerate() {
            hub.add_observer(ConnectionId::new(n as u64), Box::new(sink.clone()));
        }
        hub
    }

    #[test]
    fn test_presence_reaches_every_observer() {
        let (a, b) = (CollectingSink::new(), CollectingSink::new());
        let hub = hub_with(&[a.clone(), b.clone()]);

        let mut registry = ConnectionRegistry::new();
        registry.register("s1".into(), "Ali".into(), Role::Student, None, ConnectionId::new(0));

        assert_eq!(hub.broadcast_presence(&registry), 2);
        for sink in [&a, &b] {
            let data = sink.last("online_students").unwrap();
            assert_eq!(data[0]["id"], "s1");
            assert_eq!(data[0]["status"], "online");
        }
    }

    #[test]
    fn test_failed_observer_does_not_block_others() {
        let healthy = CollectingSink::new();
        let mut hub = BroadcastHub::new();
        hub.add_observer(ConnectionId::new(1), Box::new(CollectingSink::failing(ConnectionId::new(1))));
        hub.add_observer(ConnectionId::new(2), Box::new(healthy.clone()));

        let delivered = hub.broadcast_activity(Map::new());
        assert_eq!(delivered, 1);
        assert_eq!(healthy.count("activity_update"), 1);
        assert_eq!(hub.observer_count(), 2);
    }

    #[test]
    fn test_removed_observer_misses_later_events() {
        let sink = CollectingSink::new();
        let mut hub = hub_with(&[sink.clone()]);

        assert!(hub.remove_observer(ConnectionId::new(0)));
        assert!(!hub.remove_observer(ConnectionId::new(0)));

        hub.broadcast_presence(&ConnectionRegistry::new());
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_relay_and_submission_are_verbatim() {
        let sink = CollectingSink::new();
        let hub = hub_with(&[sink.clone()]);

        let frame: ScreenFrame = serde_json::from_value(json!({ "studentId": "s1", "image": "AAA" })).unwrap();
        hub.relay_ephemeral(frame);

        let submission: TestSubmitted =
            serde_json::from_value(json!({ "studentId": "s1", "score": 90, "grade": 5 })).unwrap();
        hub.broadcast_submission(submission);

        assert_eq!(
            sink.last("screen_mirror_update").unwrap(),
            json!({ "studentId": "s1", "image": "AAA" })
        );
        assert_eq!(
            sink.last("test_submission").unwrap(),
            json!({ "studentId": "s1", "score": 90, "grade": 5 })
        );
    }

    #[test]
    fn test_no_observers_is_fine() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.broadcast_presence(&ConnectionRegistry::new()), 0);
    }
}
