//! Realtime client for CHECKmate.
//!
//! Owns one logical WebSocket connection to the gateway: performs the
//! auth/subscribe handshake on open, auto-reconnects after a fixed delay on
//! loss, and maps each inbound domain event to the cached queries the UI
//! must refetch.

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod manager;

pub use cache::{QueryCache, QueryKey};
pub use common::{ClientEnvelope, EventKind, EventPayload, Identity, ServerEnvelope, UserRole};
pub use dispatcher::invalidations;
pub use error::{ClientError, Result};
pub use handler::EventHandler;
pub use manager::{ClientCommand, ClientConfig, RealtimeClient, RealtimeHandle};
