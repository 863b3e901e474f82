//! Cached-query identities and the invalidation seam.
//!
//! The UI keeps query results keyed by `QueryKey`; invalidating a key marks
//! it stale so the next read refetches. This crate only ever calls
//! `invalidate`; reads stay with the UI.

/// A cached query family, global or scoped to one course.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// Chat messages across courses.
    Chat,
    /// Chat messages for one course.
    CourseChat(String),
    /// Announcements across courses.
    Announcements,
    /// Announcements for one course.
    CourseAnnouncements(String),
    /// Assignment lists.
    Assignments,
    /// Grade lists.
    Grades,
    /// Submission lists.
    Submissions,
    /// Course lists.
    Courses,
    /// One course's detail view.
    Course(String),
    /// One course's assignments.
    CourseAssignments(String),
    /// One course's submissions.
    CourseSubmissions(String),
}

/// The cache primitive this layer needs from the surrounding application.
pub trait QueryCache: Send + Sync + 'static {
    /// Mark a query family stale so the next read refetches it.
    fn invalidate(&self, key: &QueryKey);
}
