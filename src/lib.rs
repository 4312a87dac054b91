// Upstream connection, reconnect policy, framing
pub mod transport;

// Payload decoding into typed updates
pub mod event;

// World state store and entity model
pub mod state;

// Incident alert side effects
pub mod dispatch;

// Listener registry and WebSocket change feed
pub mod subscription;

// Owned pipeline wiring everything together
pub mod pipeline;

// Configuration loading
pub mod config;

// Read-only HTTP and WebSocket APIs
pub mod api;

pub use config::SyncConfig;
pub use pipeline::{SyncHandle, SyncPipeline};
