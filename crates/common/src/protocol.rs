//! Wire protocol for the realtime channel.
//!
//! Every frame is a JSON object tagged with `type` (snake_case); field names
//! are camelCase to match what the browser sends. Control frames flow
//! client → server, acks and domain broadcasts flow server → client. Both
//! directions are closed enums, so an unknown `type` or a missing required
//! field is a deserialization error at the edge rather than a half-parsed
//! frame deeper in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role attached to a connection by the `auth` control frame.
///
/// Trust is established upstream by the session that served the page; this
/// layer records the role but never verifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Instructor,
    Administrator,
}

/// The identity pair carried by the `auth` frame: connection state on the
/// server, configuration on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_role: UserRole,
}

/// Control frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEnvelope {
    /// Attach an identity to the connection. Re-sending overwrites the
    /// previous identity (last write wins).
    Auth { user_id: String, user_role: UserRole },
    /// Express interest in course-scoped broadcasts for one course.
    SubscribeCourse { course_id: String },
    /// Withdraw interest in one course.
    UnsubscribeCourse { course_id: String },
    /// Liveness probe; answered with `pong`.
    Ping,
}

/// Payload of a domain broadcast: the committed domain row, attached
/// verbatim, plus the moment the registry built the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl EventPayload {
    /// The `courseId` the registry injects into course-scoped payloads,
    /// when present.
    pub fn course_id(&self) -> Option<&str> {
        self.data.get("courseId").and_then(Value::as_str)
    }
}

/// Frames sent by the server: acks for control frames plus the six domain
/// broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEnvelope {
    AuthSuccess { user_id: String },
    Subscribed { course_id: String },
    Unsubscribed { course_id: String },
    Pong,
    ChatMessage(EventPayload),
    AnnouncementCreated(EventPayload),
    AssignmentUpdated(EventPayload),
    GradeUpdated(EventPayload),
    SubmissionCreated(EventPayload),
    CourseUpdated(EventPayload),
}

/// The six domain broadcast types.
///
/// Calling code names events through this enum instead of constructing raw
/// envelopes, so a typo'd event type cannot reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChatMessage,
    AnnouncementCreated,
    AssignmentUpdated,
    GradeUpdated,
    SubmissionCreated,
    CourseUpdated,
}

impl EventKind {
    /// Wire tag, also used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ChatMessage => "chat_message",
            EventKind::AnnouncementCreated => "announcement_created",
            EventKind::AssignmentUpdated => "assignment_updated",
            EventKind::GradeUpdated => "grade_updated",
            EventKind::SubmissionCreated => "submission_created",
            EventKind::CourseUpdated => "course_updated",
        }
    }

    /// Build the outbound envelope for this event.
    pub fn envelope(self, data: Value, timestamp: DateTime<Utc>) -> ServerEnvelope {
        let payload = EventPayload { data, timestamp };
        match self {
            EventKind::ChatMessage => ServerEnvelope::ChatMessage(payload),
            EventKind::AnnouncementCreated => ServerEnvelope::AnnouncementCreated(payload),
            EventKind::AssignmentUpdated => ServerEnvelope::AssignmentUpdated(payload),
            EventKind::GradeUpdated => ServerEnvelope::GradeUpdated(payload),
            EventKind::SubmissionCreated => ServerEnvelope::SubmissionCreated(payload),
            EventKind::CourseUpdated => ServerEnvelope::CourseUpdated(payload),
        }
    }
}
