//! Shared wire protocol for the CHECKmate realtime layer.

pub mod protocol;

pub use protocol::{ClientEnvelope, EventKind, EventPayload, Identity, ServerEnvelope, UserRole};
