mod dispatcher;
mod hub;
mod lifecycle;
mod participant;
pub mod protocol;
mod registry;
mod service;
mod session;

pub use dispatcher::PresenceHandle;
pub use hub::{BroadcastHub, ObserverSink};
pub use lifecycle::Handshake;
pub use participant::{ConnectionId, Participant, Role};
pub use registry::ConnectionRegistry;
pub use service::{PresenceService, PresenceStats};
pub use session::SessionStatus;
