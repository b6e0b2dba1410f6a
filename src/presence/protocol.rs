//! JSON frames exchanged over the presence socket.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`. Payload keys are camelCase
//! and unknown keys are carried through untouched, so clients can attach whatever
//! metadata they need to a status change, a frame, or a submission.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::participant::Participant;
use crate::error::{PresenceError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundMessage {
    TestStarted(TestStarted),
    ScreenUpdate(ScreenFrame),
    TestSubmitted(TestSubmitted),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStarted {
    pub student_id: String,
    pub test_title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSubmitted {
    pub student_id: String,
    /// Result summary (score, percentage, grade, ...) as sent by the client
    #[serde(flatten)]
    pub summary: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenFrame {
    pub student_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Testing,
    Finished,
}

/// Echo of a status-changing event with the status it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_title: Option<String>,
    pub status: ReportedStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusUpdate {
    pub fn testing(event: &TestStarted) -> Self {
        Self {
            student_id: event.student_id.clone(),
            test_title: Some(event.test_title.clone()),
            status: ReportedStatus::Testing,
            extra: without_status(&event.extra),
        }
    }

    pub fn finished(event: &TestSubmitted) -> Self {
        Self {
            student_id: event.student_id.clone(),
            test_title: None,
            status: ReportedStatus::Finished,
            extra: without_status(&event.summary),
        }
    }
}

fn without_status(fields: &Map<String, Value>) -> Map<String, Value> {
    let mut fields = fields.clone();
    fields.remove("status");
    fields
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    OnlineStudents(Vec<Participant>),
    StudentStatusUpdate(StatusUpdate),
    ScreenMirrorUpdate(ScreenFrame),
    TestSubmission(TestSubmitted),
    ActivityUpdate(Map<String, Value>),
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| PresenceError::InvalidMessage(e.to_string()))
    }

    pub fn student_id(&self) -> &str {
        match self {
            InboundMessage::TestStarted(event) => &event.student_id,
            InboundMessage::ScreenUpdate(frame) => &frame.student_id,
            InboundMessage::TestSubmitted(event) => &event.student_id,
        }
    }
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundMessage::OnlineStudents(_) => "online_students",
            OutboundMessage::StudentStatusUpdate(_) => "student_status_update",
            OutboundMessage::ScreenMirrorUpdate(_) => "screen_mirror_update",
            OutboundMessage::TestSubmission(_) => "test_submission",
            OutboundMessage::ActivityUpdate(_) => "activity_update",
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
