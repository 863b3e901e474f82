//! Manual probe against a running gateway: authenticate, watch a course,
//! print everything that arrives.
//!
//! Usage: `cargo run -p client --example ws_probe -- http://localhost:8080 K1`

use async_trait::async_trait;
use client::{
    ClientConfig, EventHandler, Identity, RealtimeClient, ServerEnvelope, UserRole,
};
use std::env;
use std::sync::Arc;

struct PrintEvents;

#[async_trait]
impl EventHandler for PrintEvents {
    async fn on_event(&self, envelope: &ServerEnvelope) {
        println!("<- {envelope:?}");
    }

    async fn on_disconnect(&self) {
        println!("connection lost");
    }

    async fn on_connect(&self) {
        println!("connected");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let mut args = env::args().skip(1);
    let origin = args.next().unwrap_or_else(|| "http://localhost:8080".to_string());
    let course = args.next().unwrap_or_else(|| "K1".to_string());

    let mut config = ClientConfig::new(origin);
    config.identity = Some(Identity {
        user_id: "probe".to_string(),
        user_role: UserRole::Student,
    });
    config.courses = vec![course];

    let (client, handle) = RealtimeClient::new(config, None, Some(Arc::new(PrintEvents)));
    let task = tokio::spawn(client.run());

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await?;
    task.await?;
    Ok(())
}
