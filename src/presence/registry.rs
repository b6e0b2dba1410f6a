use std::collections::HashMap;

use super::participant::{ConnectionId, Participant, Role};
use super::session::SessionEvent;

struct Slot {
    /// Position in the snapshot, fixed at first registration of the id
    order: u64,
    participant: Participant,
}

/// Live participants keyed by id. Owned by the dispatcher task, so no locking.
#[derive(Default)]
pub struct ConnectionRegistry {
    slots: HashMap<String, Slot>,
    next_order: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`. The new entry is always `Online`.
    /// Returns the replaced entry, if any. An entry owned by a newer connection
    /// is never replaced by an older one that reached the registry late.
    pub fn register(
        &mut self,
        id: String,
        display_name: String,
        role: Role,
        group_code: Option<String>,
        connection: ConnectionId,
    ) -> Option<Participant> {
        let participant = Participant::new(id.clone(), display_name, role, group_code, connection);

        if let Some(slot) = self.slots.get_mut(&id) {
            if slot.participant.connection > connection {
                tracing::debug!(
                    participant_id = %id,
                    current_connection = %slot.participant.connection,
                    connection_id = %connection,
                    "Ignoring registration from an older connection"
                );
                return None;
            }
            let previous = std::mem::replace(&mut slot.participant, participant);
            tracing::info!(
                participant_id = %id,
                previous_connection = %previous.connection,
                connection_id = %connection,
                "Participant reconnected, replacing previous entry"
            );
            return Some(previous);
        }

        let order = self.next_order;
        self.next_order += 1;
        self.slots.insert(id, Slot { order, participant });
        None
    }

    /// Remove the entry for `id`. Absent ids are not an error.
    pub fn deregister(&mut self, id: &str) -> Option<Participant> {
        self.slots.remove(id).map(|slot| slot.participant)
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.slots.get(id).map(|slot| &slot.participant)
    }

    pub fn set_testing(&mut self, id: &str, test_title: impl Into<String>) -> bool {
        self.apply(
            id,
            SessionEvent::TestStarted {
                test_title: test_title.into(),
            },
        )
    }

    pub fn set_online(&mut self, id: &str) -> bool {
        self.apply(id, SessionEvent::TestSubmitted)
    }

    /// Apply a session event to a registered participant. Unknown ids are left
    /// untouched so a late event cannot resurrect a removed entry.
    fn apply(&mut self, id: &str, event: SessionEvent) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) => {
                slot.participant.status = slot.participant.status.apply(event);
                true
            }
            None => false,
        }
    }

    /// Owned copy of every entry in registration order.
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut slots: Vec<&Slot> = self.slots.values().collect();
        slots.sort_by_key(|slot| slot.order);
        slots.into_iter().map(|slot| slot.participant.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
