//! Connection state and registry.
//!
//! Uses DashMap for concurrent access: register/unregister may race with a
//! broadcast iterating the membership set, so every broadcast snapshots its
//! recipient list before sending.
//!
//! A reverse index (course id → connection ids) keeps course-scoped fan-out
//! from scanning every connection.

use crate::error::Result;
use axum::extract::ws::Message;
use chrono::Utc;
use common::{EventKind, Identity, ServerEnvelope};
use dashmap::{DashMap, DashSet};
use metrics::counter;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique connection identifier. Log-only, never on the wire.
pub type ConnectionId = Uuid;

/// State for a single live connection.
///
/// Identity and subscriptions are independent axes: an unauthenticated
/// connection may hold course subscriptions, but user-targeted broadcasts
/// will never reach it.
pub struct ConnectionState {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Channel to the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
    /// Set by `auth`; last write wins.
    identity: RwLock<Option<Identity>>,
    /// Courses this connection explicitly asked to watch. Never mutated on
    /// its behalf by anything other than its own control frames.
    courses: DashSet<String>,
    /// Millis since Unix epoch when the connection was accepted.
    pub connected_at: i64,
}

impl ConnectionState {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            identity: RwLock::new(None),
            courses: DashSet::new(),
            connected_at: Utc::now().timestamp_millis(),
        }
    }

    /// Serialize an envelope and hand it to the writer task.
    pub fn send(&self, envelope: &ServerEnvelope) -> Result<()> {
        let json = serde_json::to_string(envelope)?;
        self.tx.send(Message::Text(json.into()))?;
        Ok(())
    }

    pub fn set_identity(&self, identity: Identity) {
        *self.identity.write().unwrap() = Some(identity);
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().unwrap().clone()
    }

    pub fn is_subscribed(&self, course_id: &str) -> bool {
        self.courses.contains(course_id)
    }

    pub fn subscribed_courses(&self) -> Vec<String> {
        self.courses.iter().map(|c| c.clone()).collect()
    }
}

/// Who a broadcast is for.
///
/// An explicit, capability-scoped filter instead of an arbitrary predicate:
/// the three audiences are the only selection strategies the system has.
#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    All,
    User(&'a str),
    Course(&'a str),
}

/// Registry of live connections.
///
/// Owned by whatever boots the server and shared by `Arc`; created at start,
/// dropped at stop. Calling code reaches fan-out exclusively through the
/// `notify_*` methods, which fix the event type and audience per domain
/// event.
pub struct ConnectionRegistry {
    /// Connection id → state.
    connections: DashMap<ConnectionId, Arc<ConnectionState>>,
    /// Course id → subscribed connection ids.
    course_index: DashMap<String, DashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            course_index: DashMap::new(),
        }
    }

    /// Add a connection: empty subscription set, no identity.
    pub fn register(&self, conn: Arc<ConnectionState>) -> ConnectionId {
        let id = conn.id;
        self.connections.insert(id, conn);
        info!(connection_id = %id, "connection registered");
        id
    }

    /// Remove a connection and scrub it from the course index. Idempotent:
    /// unregistering an absent connection is a no-op.
    pub fn unregister(&self, id: &ConnectionId) {
        let Some((_, conn)) = self.connections.remove(id) else {
            return;
        };
        for course in conn.courses.iter() {
            if let Some(subscribers) = self.course_index.get(course.key()) {
                subscribers.remove(id);
            }
        }
        self.course_index.retain(|_, subscribers| !subscribers.is_empty());
        info!(connection_id = %id, "connection unregistered");
    }

    /// Add a course subscription. Set semantics: re-subscribing is a no-op.
    pub fn subscribe(&self, conn: &ConnectionState, course_id: &str) {
        conn.courses.insert(course_id.to_string());
        self.course_index
            .entry(course_id.to_string())
            .or_default()
            .insert(conn.id);
        counter!("gateway_subscriptions_total").increment(1);
        debug!(connection_id = %conn.id, course_id, "subscribed");
    }

    /// Remove a course subscription; no-op if absent.
    pub fn unsubscribe(&self, conn: &ConnectionState, course_id: &str) {
        conn.courses.remove(course_id);
        if let Some(subscribers) = self.course_index.get(course_id) {
            subscribers.remove(&conn.id);
        }
        debug!(connection_id = %conn.id, course_id, "unsubscribed");
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.course_index.iter().map(|e| e.value().len()).sum()
    }

    /// Snapshot the recipient set for an audience. Taken up front so a
    /// connection closing mid-broadcast cannot disturb iteration.
    fn recipients(&self, audience: Audience<'_>) -> Vec<Arc<ConnectionState>> {
        match audience {
            Audience::All => self.connections.iter().map(|e| e.value().clone()).collect(),
            Audience::User(user_id) => self
                .connections
                .iter()
                .filter(|e| {
                    e.value()
                        .identity()
                        .is_some_and(|identity| identity.user_id == user_id)
                })
                .map(|e| e.value().clone())
                .collect(),
            Audience::Course(course_id) => match self.course_index.get(course_id) {
                Some(subscribers) => subscribers
                    .iter()
                    .filter_map(|id| self.connections.get(&*id).map(|e| e.value().clone()))
                    .collect(),
                None => Vec::new(),
            },
        }
    }

    /// Build the envelope (stamping the timestamp now), serialize it once,
    /// and deliver to every connection in the audience. A failed send means
    /// the connection's writer task is gone; it is skipped, never an error,
    /// and the socket task reaps it through its own close path.
    pub fn broadcast(&self, kind: EventKind, data: Value, audience: Audience<'_>) {
        let envelope = kind.envelope(data, Utc::now());
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                warn!(event = kind.as_str(), error = %e, "failed to serialize broadcast");
                return;
            }
        };

        counter!("gateway_events_broadcast_total", "event" => kind.as_str()).increment(1);

        for conn in self.recipients(audience) {
            if conn.tx.send(Message::Text(json.clone().into())).is_err() {
                debug!(connection_id = %conn.id, "skipping closed connection");
            }
        }
    }

    pub fn broadcast_to_all(&self, kind: EventKind, data: Value) {
        self.broadcast(kind, data, Audience::All);
    }

    /// Deliver to every connection authenticated as `user_id`; connections
    /// with no identity are never matched.
    pub fn broadcast_to_user(&self, user_id: &str, kind: EventKind, data: Value) {
        self.broadcast(kind, data, Audience::User(user_id));
    }

    /// Deliver to every connection subscribed to `course_id`, injecting the
    /// course id into the payload so receivers can self-filter.
    pub fn broadcast_to_course(&self, course_id: &str, kind: EventKind, data: Value) {
        let data = inject_course_id(data, course_id);
        self.broadcast(kind, data, Audience::Course(course_id));
    }

    // Named entry points per domain event. Calling code never constructs
    // envelopes or picks audiences itself.

    pub fn notify_chat_message(&self, course_id: &str, message: Value) {
        self.broadcast_to_course(course_id, EventKind::ChatMessage, message);
    }

    pub fn notify_announcement_created(&self, course_id: &str, announcement: Value) {
        self.broadcast_to_course(course_id, EventKind::AnnouncementCreated, announcement);
    }

    pub fn notify_assignment_update(&self, course_id: &str, assignment: Value) {
        self.broadcast_to_course(course_id, EventKind::AssignmentUpdated, assignment);
    }

    pub fn notify_submission_created(&self, course_id: &str, submission: Value) {
        self.broadcast_to_course(course_id, EventKind::SubmissionCreated, submission);
    }

    pub fn notify_course_update(&self, course_id: &str, course: Value) {
        self.broadcast_to_course(course_id, EventKind::CourseUpdated, course);
    }

    /// Grades go to the graded student, wherever they are connected, not to
    /// the course at large.
    pub fn notify_grade_update(&self, user_id: &str, grade: Value) {
        self.broadcast_to_user(user_id, EventKind::GradeUpdated, grade);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamp the course id into an object payload. A null payload becomes a
/// fresh object; non-object payloads pass through untouched.
fn inject_course_id(mut data: Value, course_id: &str) -> Value {
    match data {
        Value::Object(ref mut map) => {
            map.insert("courseId".to_string(), Value::String(course_id.to_string()));
            data
        }
        Value::Null => serde_json::json!({ "courseId": course_id }),
        other => other,
    }
}
