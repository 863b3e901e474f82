//! WebSocket connection manager with handshake, keepalive, and
//! reconnection.
//!
//! One `RealtimeClient` owns one logical connection at a time. The task
//! created by [`RealtimeClient::run`] connects, replays the handshake
//! (`auth`, then one `subscribe_course` per watched course, in order), pumps
//! frames, and on loss waits a fixed delay before reconnecting. Because the
//! wait is a single deadline inside one task, rapid close cycles can never
//! stack reconnect attempts.

use crate::cache::QueryCache;
use crate::dispatcher;
use crate::error::{ClientError, Result};
use crate::handler::EventHandler;
use common::{ClientEnvelope, Identity, ServerEnvelope};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Delay between a close and the next connection attempt.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Keepalive interval for envelope-level pings.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the realtime client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base origin of the CHECKmate deployment (`http://…` or `https://…`);
    /// the websocket endpoint is derived from it (`http→ws`, `https→wss`,
    /// fixed `/ws` path).
    pub origin: String,
    /// Identity to announce on connect. Absent for anonymous connections.
    pub identity: Option<Identity>,
    /// Courses to watch, subscribed in this order on every (re)connect.
    pub courses: Vec<String>,
    /// Delay before reconnecting after the connection closes.
    pub reconnect_delay: Duration,
    /// Interval between envelope-level `ping` frames.
    pub ping_interval: Duration,
}

impl ClientConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            identity: None,
            courses: Vec::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

/// Commands the handle can send to the client task.
#[derive(Debug)]
pub enum ClientCommand {
    /// Send one frame now. Dropped with a warning while disconnected.
    Send(ClientEnvelope),
    /// Watch a course: subscribes now if connected, and on every
    /// subsequent reconnect.
    Subscribe(String),
    /// Stop watching a course.
    Unsubscribe(String),
    /// Close the connection and stop; cancels any pending reconnect.
    Shutdown,
}

/// Handle to a running [`RealtimeClient`].
///
/// Dropping the handle shuts the client down, so whoever creates the client
/// cannot leak a reconnect loop past its own lifetime.
pub struct RealtimeHandle {
    command_tx: mpsc::Sender<ClientCommand>,
}

impl RealtimeHandle {
    pub async fn send(&self, envelope: ClientEnvelope) -> Result<()> {
        self.command(ClientCommand::Send(envelope)).await
    }

    pub async fn subscribe_course(&self, course_id: impl Into<String>) -> Result<()> {
        self.command(ClientCommand::Subscribe(course_id.into())).await
    }

    pub async fn unsubscribe_course(&self, course_id: impl Into<String>) -> Result<()> {
        self.command(ClientCommand::Unsubscribe(course_id.into())).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command(ClientCommand::Shutdown).await
    }

    async fn command(&self, command: ClientCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.try_send(ClientCommand::Shutdown);
    }
}

/// The realtime client. Construct with [`RealtimeClient::new`], then drive
/// it with `tokio::spawn(client.run())`.
pub struct RealtimeClient {
    config: ClientConfig,
    cache: Option<Arc<dyn QueryCache>>,
    handler: Option<Arc<dyn EventHandler>>,
    command_rx: mpsc::Receiver<ClientCommand>,
    /// Courses re-subscribed on every reconnect. Seeded from the config,
    /// updated by Subscribe/Unsubscribe commands, order preserved.
    watched: Vec<String>,
}

impl RealtimeClient {
    pub fn new(
        config: ClientConfig,
        cache: Option<Arc<dyn QueryCache>>,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> (Self, RealtimeHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let watched = config.courses.clone();
        let client = Self {
            config,
            cache,
            handler,
            command_rx,
            watched,
        };
        (client, RealtimeHandle { command_tx })
    }

    /// Run until shut down, reconnecting on loss.
    pub async fn run(mut self) {
        loop {
            match self.connect_and_run().await {
                Ok(()) => break,
                Err(e) => {
                    counter!("realtime_client_disconnects_total").increment(1);
                    warn!(
                        error = %e,
                        delay_ms = self.config.reconnect_delay.as_millis() as u64,
                        "realtime connection lost; will reconnect"
                    );
                    if let Some(handler) = &self.handler {
                        handler.on_disconnect().await;
                    }
                }
            }
            if !self.wait_for_reconnect().await {
                break;
            }
        }
        info!("realtime client stopped");
    }

    /// One connection attempt: handshake, then pump frames until the
    /// connection drops (`Err`) or we are told to stop (`Ok`).
    async fn connect_and_run(&mut self) -> Result<()> {
        let url = ws_url(&self.config.origin)?;
        debug!(url = %url, "connecting");

        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        for frame in handshake_frames(self.config.identity.as_ref(), &self.watched) {
            write.send(Message::Text(serde_json::to_string(&frame)?)).await?;
        }

        info!(url = %url, watched = self.watched.len(), "realtime connection open");
        if let Some(handler) = &self.handler {
            handler.on_connect().await;
        }

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.reset(); // don't fire immediately

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Binary(_))) => {
                            debug!("ignoring binary frame");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(frame = ?frame, "server closed connection");
                            return Err(ClientError::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            // Transport errors are always followed by closure;
                            // the reconnect is driven from there.
                            return Err(e.into());
                        }
                        None => return Err(ClientError::ConnectionClosed),
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ClientCommand::Send(envelope)) => {
                            write.send(Message::Text(serde_json::to_string(&envelope)?)).await?;
                        }
                        Some(ClientCommand::Subscribe(course_id)) => {
                            self.watch(course_id.clone());
                            let frame = ClientEnvelope::SubscribeCourse { course_id };
                            write.send(Message::Text(serde_json::to_string(&frame)?)).await?;
                        }
                        Some(ClientCommand::Unsubscribe(course_id)) => {
                            self.unwatch(&course_id);
                            let frame = ClientEnvelope::UnsubscribeCourse { course_id };
                            write.send(Message::Text(serde_json::to_string(&frame)?)).await?;
                        }
                        Some(ClientCommand::Shutdown) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(Message::Text(serde_json::to_string(&ClientEnvelope::Ping)?)).await?;
                }
            }
        }
    }

    /// Wait out the reconnect delay. One deadline per disconnect: commands
    /// arriving meanwhile are handled without rescheduling it. Returns false
    /// when told to stop.
    async fn wait_for_reconnect(&mut self) -> bool {
        let deadline = Instant::now() + self.config.reconnect_delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ClientCommand::Send(_)) => {
                            warn!("realtime channel not open; dropping outbound frame");
                        }
                        Some(ClientCommand::Subscribe(course_id)) => self.watch(course_id),
                        Some(ClientCommand::Unsubscribe(course_id)) => self.unwatch(&course_id),
                        Some(ClientCommand::Shutdown) | None => return false,
                    }
                }
            }
        }
    }

    /// Parse one inbound frame, run the application callback, then the
    /// built-in cache invalidation. The two are independent; a missing
    /// handler never skips invalidation.
    async fn handle_frame(&self, text: &str) {
        let envelope = match serde_json::from_str::<ServerEnvelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame");
                return;
            }
        };
        counter!("realtime_client_events_total").increment(1);

        if let Some(handler) = &self.handler {
            handler.on_event(&envelope).await;
        }
        if let Some(cache) = &self.cache {
            dispatcher::dispatch(cache.as_ref(), &envelope);
        }
    }

    fn watch(&mut self, course_id: String) {
        if !self.watched.contains(&course_id) {
            self.watched.push(course_id);
        }
    }

    fn unwatch(&mut self, course_id: &str) {
        self.watched.retain(|c| c != course_id);
    }
}

/// Map the page origin to the websocket endpoint: `http→ws`, `https→wss`,
/// fixed `/ws` path. `ws`/`wss` origins pass through.
fn ws_url(origin: &str) -> Result<String> {
    let mut url = Url::parse(origin.trim())?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;
    url.set_path("/ws");
    Ok(url.to_string())
}

/// Frames replayed at the start of every connection: `auth` first when an
/// identity is configured, then the watched courses in order.
fn handshake_frames(identity: Option<&Identity>, courses: &[String]) -> Vec<ClientEnvelope> {
    let mut frames = Vec::with_capacity(courses.len() + 1);
    if let Some(identity) = identity {
        frames.push(ClientEnvelope::Auth {
            user_id: identity.user_id.clone(),
            user_role: identity.user_role,
        });
    }
    frames.extend(courses.iter().map(|course_id| ClientEnvelope::SubscribeCourse {
        course_id: course_id.clone(),
    }));
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UserRole;

    #[test]
    fn ws_url_maps_schemes_and_fixes_path() {
        assert_eq!(ws_url("http://localhost:8080").unwrap(), "ws://localhost:8080/ws");
        assert_eq!(
            ws_url("https://checkmate.example.edu").unwrap(),
            "wss://checkmate.example.edu/ws"
        );
        assert_eq!(
            ws_url("https://checkmate.example.edu/app").unwrap(),
            "wss://checkmate.example.edu/ws"
        );
        assert!(ws_url("ftp://example.com").is_err());
        assert!(ws_url("not a url").is_err());
    }

    #[test]
    fn handshake_is_auth_then_courses_in_order() {
        let identity = Identity {
            user_id: "u1".to_string(),
            user_role: UserRole::Student,
        };
        let courses = vec!["K1".to_string(), "K2".to_string()];
        let frames = handshake_frames(Some(&identity), &courses);
        assert_eq!(
            frames,
            vec![
                ClientEnvelope::Auth {
                    user_id: "u1".to_string(),
                    user_role: UserRole::Student,
                },
                ClientEnvelope::SubscribeCourse {
                    course_id: "K1".to_string()
                },
                ClientEnvelope::SubscribeCourse {
                    course_id: "K2".to_string()
                },
            ]
        );
    }

    #[test]
    fn anonymous_handshake_skips_auth() {
        let frames = handshake_frames(None, &["K1".to_string()]);
        assert_eq!(
            frames,
            vec![ClientEnvelope::SubscribeCourse {
                course_id: "K1".to_string()
            }]
        );
    }

    #[test]
    fn watch_list_deduplicates_and_preserves_order() {
        let (mut client, _handle) = RealtimeClient::new(
            ClientConfig::new("http://localhost:8080"),
            None,
            None,
        );
        client.watch("K1".to_string());
        client.watch("K2".to_string());
        client.watch("K1".to_string());
        assert_eq!(client.watched, vec!["K1".to_string(), "K2".to_string()]);

        client.unwatch("K1");
        assert_eq!(client.watched, vec!["K2".to_string()]);
        client.unwatch("K1");
        assert_eq!(client.watched, vec!["K2".to_string()]);
    }
}
