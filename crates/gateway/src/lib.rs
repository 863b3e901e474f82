//! Realtime gateway for CHECKmate.
//!
//! This service:
//! - Accepts WebSocket connections from browser tabs
//! - Tracks each connection's identity and course subscriptions
//! - Fans domain events (chat, announcements, assignments, grades,
//!   submissions, course updates) out to the matching subset of connections
//!
//! ## Architecture
//!
//! ```text
//! domain mutation (committed elsewhere)
//!         ↓ notify_* call
//! ConnectionRegistry (DashMap-based, lock-free)
//!         ↓ per-connection mpsc
//! WebSocket clients
//! ```
//!
//! Delivery is fire-and-forget: events are not stored for offline clients,
//! and a missed event is recovered by the application's normal refetch
//! paths.

pub mod error;
pub mod registry;
pub mod router;
pub mod ws_server;

pub use common::Identity;
pub use error::{GatewayError, Result};
pub use registry::{Audience, ConnectionId, ConnectionRegistry, ConnectionState};
pub use ws_server::{create_router, AppState};
