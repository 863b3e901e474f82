//! Inbound control-frame handling.
//!
//! Each connection's frames are handled to completion in arrival order by
//! its own socket task, so a connection's state is never mutated
//! concurrently with itself. Identity and subscriptions are independent
//! axes: neither transition guards on the other.

use crate::registry::{ConnectionRegistry, ConnectionState};
use common::{ClientEnvelope, Identity, ServerEnvelope};
use tracing::{debug, warn};

/// Parse a text frame and apply it. A frame that is not valid JSON, names
/// an unknown `type`, or is missing a required field is logged and dropped;
/// the connection stays open.
pub fn handle_text_frame(registry: &ConnectionRegistry, conn: &ConnectionState, text: &str) {
    match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => handle_envelope(registry, conn, envelope),
        Err(e) => {
            warn!(connection_id = %conn.id, error = %e, "dropping malformed frame");
        }
    }
}

/// Apply one control frame to the connection's state and ack it.
pub fn handle_envelope(
    registry: &ConnectionRegistry,
    conn: &ConnectionState,
    envelope: ClientEnvelope,
) {
    match envelope {
        ClientEnvelope::Auth { user_id, user_role } => {
            // No credential check here: trust comes from the session that
            // served the page. Last write wins.
            conn.set_identity(Identity {
                user_id: user_id.clone(),
                user_role,
            });
            debug!(connection_id = %conn.id, user_id = %user_id, "authenticated");
            let _ = conn.send(&ServerEnvelope::AuthSuccess { user_id });
        }
        ClientEnvelope::SubscribeCourse { course_id } => {
            registry.subscribe(conn, &course_id);
            let _ = conn.send(&ServerEnvelope::Subscribed { course_id });
        }
        ClientEnvelope::UnsubscribeCourse { course_id } => {
            registry.unsubscribe(conn, &course_id);
            let _ = conn.send(&ServerEnvelope::Unsubscribed { course_id });
        }
        ClientEnvelope::Ping => {
            let _ = conn.send(&ServerEnvelope::Pong);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use common::UserRole;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn connect(registry: &ConnectionRegistry) -> (Arc<ConnectionState>, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(ConnectionState::new(tx));
        registry.register(conn.clone());
        (conn, rx)
    }

    fn recv_frame(rx: &mut UnboundedReceiver<Message>) -> Value {
        match rx.try_recv().expect("expected a frame") {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn auth_sets_identity_and_acks() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = connect(&registry);

        handle_text_frame(
            &registry,
            &conn,
            r#"{"type":"auth","userId":"u1","userRole":"instructor"}"#,
        );

        let identity = conn.identity().unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.user_role, UserRole::Instructor);
        let ack = recv_frame(&mut rx);
        assert_eq!(ack["type"], "auth_success");
        assert_eq!(ack["userId"], "u1");
    }

    #[test]
    fn subscribe_then_unsubscribe_acks_both_ways() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = connect(&registry);

        handle_text_frame(
            &registry,
            &conn,
            r#"{"type":"subscribe_course","courseId":"K1"}"#,
        );
        assert!(conn.is_subscribed("K1"));
        assert_eq!(recv_frame(&mut rx)["type"], "subscribed");

        handle_text_frame(
            &registry,
            &conn,
            r#"{"type":"unsubscribe_course","courseId":"K1"}"#,
        );
        assert!(!conn.is_subscribed("K1"));
        assert_eq!(recv_frame(&mut rx)["type"], "unsubscribed");
    }

    #[test]
    fn unsubscribe_of_absent_course_still_acks() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = connect(&registry);

        handle_text_frame(
            &registry,
            &conn,
            r#"{"type":"unsubscribe_course","courseId":"never-subscribed"}"#,
        );
        let ack = recv_frame(&mut rx);
        assert_eq!(ack["type"], "unsubscribed");
        assert_eq!(ack["courseId"], "never-subscribed");
    }

    #[test]
    fn subscribing_does_not_require_auth() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = connect(&registry);

        handle_text_frame(
            &registry,
            &conn,
            r#"{"type":"subscribe_course","courseId":"K1"}"#,
        );
        assert!(conn.identity().is_none());
        assert!(conn.is_subscribed("K1"));
        assert_eq!(recv_frame(&mut rx)["type"], "subscribed");
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = connect(&registry);

        handle_text_frame(&registry, &conn, r#"{"type":"ping"}"#);
        assert_eq!(recv_frame(&mut rx)["type"], "pong");
    }

    #[test]
    fn malformed_frames_are_dropped_without_reply() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = connect(&registry);

        handle_text_frame(&registry, &conn, "not json at all");
        handle_text_frame(&registry, &conn, r#"{"type":"subscribe_course"}"#);
        handle_text_frame(&registry, &conn, r#"{"type":"warp_drive"}"#);

        assert!(rx.try_recv().is_err());
        assert!(conn.identity().is_none());
        assert!(conn.subscribed_courses().is_empty());
    }
}
