//! Event handler trait for application callbacks.

use async_trait::async_trait;
use common::ServerEnvelope;

/// Callbacks the surrounding application can hang on the connection.
///
/// `on_event` runs before the built-in cache invalidation and independently
/// of it: skipping or supplying a handler never changes what gets
/// invalidated.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Called for every parsed inbound envelope, acks included.
    async fn on_event(&self, envelope: &ServerEnvelope);

    /// Called when the connection is lost (before the reconnect wait).
    async fn on_disconnect(&self) {}

    /// Called after each successful connect, initial or otherwise.
    async fn on_connect(&self) {}
}
