//! Real-time presence and live monitoring for exam sessions.
//!
//! Students connect over a WebSocket, observers receive the full list of online
//! students every time it changes, together with test start/submit transitions,
//! relayed screen-mirror frames and activity records.

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod presence;
