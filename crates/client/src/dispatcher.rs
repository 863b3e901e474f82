//! Event → cache-invalidation dispatch.
//!
//! This table is the whole logic: each domain event names the query
//! families that must refetch, plus course-scoped keys when the payload
//! carries a `courseId`. UI freshness (students seeing new grades and
//! assignments without a manual refresh) depends on it, so changes here are
//! behavior changes.

use crate::cache::{QueryCache, QueryKey};
use common::{EventPayload, ServerEnvelope};

/// The query keys invalidated by one inbound envelope. Acks invalidate
/// nothing.
pub fn invalidations(envelope: &ServerEnvelope) -> Vec<QueryKey> {
    match envelope {
        ServerEnvelope::ChatMessage(payload) => with_course(payload, vec![QueryKey::Chat], |course| {
            vec![QueryKey::CourseChat(course)]
        }),
        ServerEnvelope::AnnouncementCreated(payload) => {
            with_course(payload, vec![QueryKey::Announcements], |course| {
                vec![QueryKey::CourseAnnouncements(course)]
            })
        }
        ServerEnvelope::AssignmentUpdated(payload) => with_course(
            payload,
            vec![QueryKey::Assignments, QueryKey::Courses],
            |course| {
                vec![
                    QueryKey::Course(course.clone()),
                    QueryKey::CourseAssignments(course),
                ]
            },
        ),
        ServerEnvelope::GradeUpdated(_) => vec![QueryKey::Grades, QueryKey::Submissions],
        ServerEnvelope::SubmissionCreated(payload) => with_course(
            payload,
            vec![QueryKey::Submissions, QueryKey::Courses],
            |course| vec![QueryKey::CourseSubmissions(course)],
        ),
        ServerEnvelope::CourseUpdated(payload) => {
            with_course(payload, vec![QueryKey::Courses], |course| {
                vec![QueryKey::Course(course)]
            })
        }
        ServerEnvelope::AuthSuccess { .. }
        | ServerEnvelope::Subscribed { .. }
        | ServerEnvelope::Unsubscribed { .. }
        | ServerEnvelope::Pong => Vec::new(),
    }
}

/// Run the table against a cache.
pub fn dispatch(cache: &dyn QueryCache, envelope: &ServerEnvelope) {
    for key in invalidations(envelope) {
        cache.invalidate(&key);
    }
}

fn with_course(
    payload: &EventPayload,
    mut keys: Vec<QueryKey>,
    scoped: impl FnOnce(String) -> Vec<QueryKey>,
) -> Vec<QueryKey> {
    if let Some(course_id) = payload.course_id() {
        keys.extend(scoped(course_id.to_string()));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::EventKind;
    use serde_json::json;

    fn event(kind: EventKind, data: serde_json::Value) -> ServerEnvelope {
        kind.envelope(data, Utc::now())
    }

    #[test]
    fn grade_update_invalidates_grades_and_submissions_only() {
        let keys = invalidations(&event(EventKind::GradeUpdated, json!({})));
        assert_eq!(keys, vec![QueryKey::Grades, QueryKey::Submissions]);
    }

    #[test]
    fn assignment_update_with_course_invalidates_four_families() {
        let keys = invalidations(&event(
            EventKind::AssignmentUpdated,
            json!({"courseId": "X"}),
        ));
        assert_eq!(
            keys,
            vec![
                QueryKey::Assignments,
                QueryKey::Courses,
                QueryKey::Course("X".to_string()),
                QueryKey::CourseAssignments("X".to_string()),
            ]
        );
    }

    #[test]
    fn chat_message_without_course_stays_global() {
        let keys = invalidations(&event(EventKind::ChatMessage, json!({"content": "hi"})));
        assert_eq!(keys, vec![QueryKey::Chat]);
    }

    #[test]
    fn chat_message_with_course_adds_course_chat() {
        let keys = invalidations(&event(
            EventKind::ChatMessage,
            json!({"content": "hi", "courseId": "K1"}),
        ));
        assert_eq!(keys, vec![QueryKey::Chat, QueryKey::CourseChat("K1".to_string())]);
    }

    #[test]
    fn announcement_with_course_adds_course_announcements() {
        let keys = invalidations(&event(
            EventKind::AnnouncementCreated,
            json!({"courseId": "K1"}),
        ));
        assert_eq!(
            keys,
            vec![
                QueryKey::Announcements,
                QueryKey::CourseAnnouncements("K1".to_string()),
            ]
        );
    }

    #[test]
    fn submission_created_invalidates_submissions_and_courses() {
        let keys = invalidations(&event(
            EventKind::SubmissionCreated,
            json!({"courseId": "K1"}),
        ));
        assert_eq!(
            keys,
            vec![
                QueryKey::Submissions,
                QueryKey::Courses,
                QueryKey::CourseSubmissions("K1".to_string()),
            ]
        );
    }

    #[test]
    fn course_update_invalidates_courses_and_detail() {
        let keys = invalidations(&event(EventKind::CourseUpdated, json!({"courseId": "K1"})));
        assert_eq!(
            keys,
            vec![QueryKey::Courses, QueryKey::Course("K1".to_string())]
        );
    }

    #[test]
    fn acks_invalidate_nothing() {
        assert!(invalidations(&ServerEnvelope::Pong).is_empty());
        assert!(invalidations(&ServerEnvelope::Subscribed {
            course_id: "K1".to_string()
        })
        .is_empty());
    }

    #[test]
    fn dispatch_hits_the_cache_once_per_key() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recording(Mutex<Vec<QueryKey>>);
        impl QueryCache for Recording {
            fn invalidate(&self, key: &QueryKey) {
                self.0.lock().unwrap().push(key.clone());
            }
        }

        let cache = Recording::default();
        dispatch(&cache, &event(EventKind::GradeUpdated, json!({})));
        assert_eq!(
            *cache.0.lock().unwrap(),
            vec![QueryKey::Grades, QueryKey::Submissions]
        );
    }
}
