use std::fmt;

use serde::Serialize;

use super::session::SessionStatus;

/// Identifies one transport connection. Ids are handed out in increasing order,
/// so a larger id is always a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Admin,
}

impl Role {
    /// Unknown or empty roles fall back to `Student`.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Student
        }
    }
}

/// A registered participant as observers see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_code: Option<String>,
    #[serde(flatten)]
    pub status: SessionStatus,
    /// Connection owning this entry; never serialized.
    #[serde(skip)]
    pub connection: ConnectionId,
}

impl Participant {
    pub fn new(
        id: String,
        display_name: String,
        role: Role,
        group_code: Option<String>,
        connection: ConnectionId,
    ) -> Self {
        Self {
            id,
            display_name,
            role,
            group_code,
            status: SessionStatus::Online,
            connection,
        }
    }

    pub fn current_test_title(&self) -> Option<&str> {
        self.status.current_test_title()
    }
}
