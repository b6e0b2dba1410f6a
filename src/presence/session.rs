//! Per-participant test session state.
//!
//! A participant is `Online` from the moment it registers. `TestStarted` moves it to
//! `Testing` and `TestSubmitted` brings it back to `Online`. Every transition is
//! accepted from every state, so duplicated or missing events never wedge a
//! participant: a second `TestStarted` overwrites the title and a stray
//! `TestSubmitted` leaves an online participant online.

use serde::Serialize;

/// Status of a registered participant. The test title only exists while testing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Online,
    Testing {
        #[serde(rename = "currentTestTitle")]
        current_test_title: String,
    },
}

/// Events that drive the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TestStarted { test_title: String },
    TestSubmitted,
}

impl SessionStatus {
    pub fn apply(&self, event: SessionEvent) -> SessionStatus {
        match event {
            SessionEvent::TestStarted { test_title } => SessionStatus::Testing {
                current_test_title: test_title,
            },
            SessionEvent::TestSubmitted => SessionStatus::Online,
        }
    }

    pub fn is_testing(&self) -> bool {
        matches!(self, SessionStatus::Testing { .. })
    }

    pub fn current_test_title(&self) -> Option<&str> {
        match self {
            SessionStatus::Online => None,
            SessionStatus::Testing { current_test_title } => Some(current_test_title),
        }
    }
}
