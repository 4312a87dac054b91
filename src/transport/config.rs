use super::{Dialer, NatsDialer, WebSocketDialer};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Which upstream client to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Websocket,
    Nats,
}

/// Upstream connection configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// WebSocket URL (`ws://...`) or NATS server URL (`nats://...`)
    #[serde(default = "default_url")]
    pub url: String,

    /// NATS subject carrying update messages
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Sent after every successful connect so the server can push a full state
    #[serde(default)]
    pub resync_request: Option<String>,

    /// NATS subject the resync request is published to
    #[serde(default)]
    pub resync_subject: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bounded delivery channel between connector and pipeline
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_subject() -> String {
    "traffic.events".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            url: default_url(),
            subject: default_subject(),
            resync_request: None,
            resync_subject: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Build the dialer selected by `kind`
    pub fn dialer(&self) -> Arc<dyn Dialer> {
        match self.kind {
            TransportKind::Websocket => Arc::new(WebSocketDialer::new(
                self.url.clone(),
                self.resync_request.clone(),
                self.connect_timeout(),
            )),
            TransportKind::Nats => Arc::new(NatsDialer::new(
                self.url.clone(),
                self.subject.clone(),
                self.resync_subject.clone(),
                self.resync_request.clone(),
                self.connect_timeout(),
            )),
        }
    }
}
