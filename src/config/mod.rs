use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

// Re-export section types owned by their modules
pub use crate::event::ProtocolConfig;
pub use crate::state::StoreConfig;
pub use crate::transport::{BackoffKind, ReconnectConfig, TransportConfig, TransportKind};

/// Complete fleetsync configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Read API configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// How often WebSocket clients receive a status update (seconds)
    #[serde(default = "default_status_interval")]
    pub status_interval_seconds: u64,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_status_interval() -> u64 {
    2
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
            status_interval_seconds: default_status_interval(),
        }
    }
}

impl SyncConfig {
    /// Defaults plus `FLEETSYNC_*` environment overrides
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `FLEETSYNC_*` environment overrides on top of this config
    pub fn with_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FLEETSYNC_URL") {
            self.transport.url = url;
        }
        if let Some(kind) = lookup("FLEETSYNC_TRANSPORT") {
            match kind.to_ascii_lowercase().as_str() {
                "websocket" | "ws" => self.transport.kind = TransportKind::Websocket,
                "nats" => self.transport.kind = TransportKind::Nats,
                other => warn!(value = %other, "Ignoring unknown FLEETSYNC_TRANSPORT"),
            }
        }
        if let Some(v) = lookup("FLEETSYNC_MAX_RETRIES") {
            match v.parse::<u32>() {
                Ok(n) => self.reconnect.max_retries = n,
                Err(_) => warn!(value = %v, "Ignoring invalid FLEETSYNC_MAX_RETRIES"),
            }
        }
        if let Some(bind) = lookup("FLEETSYNC_API_BIND") {
            self.api.bind = bind;
            self.api.enabled = true;
        }

        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<SyncConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SyncConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.transport.kind, TransportKind::Websocket);
        assert_eq!(config.reconnect.interval_ms, 3000);
        assert_eq!(config.reconnect.max_retries, 5);
        assert_eq!(config.reconnect.backoff, BackoffKind::Fixed);
        assert_eq!(config.protocol.type_field, "type");
        assert_eq!(config.protocol.tags.unit_update, "vehicle_update");
        assert_eq!(config.store.tombstone_capacity, 1024);
        assert!(!config.store.clear_on_resync);
        assert_eq!(config.store.stale_after_secs, None);
        assert!(!config.api.enabled);
        assert_eq!(config.api.status_interval_seconds, 2);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [transport]
            kind = "nats"
            url = "nats://example.com:4222"
            subject = "city.events"
            resync_request = "{\"type\":\"full_state\"}"
            resync_subject = "city.resync"

            [reconnect]
            interval_ms = 500
            max_retries = 10
            backoff = "exponential"
            max_interval_ms = 8000
            jitter = true

            [protocol]
            type_field = "kind"

            [protocol.tags]
            unit_update = "unit"

            [protocol.fields]
            speed = "velocity"
            x = "lon"

            [store]
            clear_on_resync = true
            stale_after_secs = 30

            [api]
            enabled = true
            bind = "127.0.0.1:8088"
        "#;

        let config: SyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.transport.kind, TransportKind::Nats);
        assert_eq!(config.transport.subject, "city.events");
        assert_eq!(config.transport.resync_subject.as_deref(), Some("city.resync"));
        assert_eq!(config.reconnect.backoff, BackoffKind::Exponential);
        assert!(config.reconnect.jitter);
        assert_eq!(config.protocol.type_field, "kind");
        assert_eq!(config.protocol.tags.unit_update, "unit");
        assert_eq!(config.protocol.tags.incident_end, "emergency_end");
        assert_eq!(config.protocol.fields.speed, "velocity");
        assert_eq!(config.protocol.fields.id, "id");
        assert_eq!(config.protocol.fields.x, "lon");
        assert_eq!(config.protocol.fields.y, "y");
        assert!(config.store.clear_on_resync);
        assert_eq!(config.store.stale_after_secs, Some(30));
        assert_eq!(config.api.bind, "127.0.0.1:8088");
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [reconnect]
            max_retries = 3
        "#;

        let config: SyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.reconnect.max_retries, 3);
        assert_eq!(config.reconnect.interval_ms, 3000);
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FLEETSYNC_URL", "ws://sim:9000/stream"),
            ("FLEETSYNC_TRANSPORT", "NATS"),
            ("FLEETSYNC_MAX_RETRIES", "2"),
            ("FLEETSYNC_API_BIND", "127.0.0.1:4000"),
        ]
        .into_iter()
        .collect();

        let config = SyncConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.transport.url, "ws://sim:9000/stream");
        assert_eq!(config.transport.kind, TransportKind::Nats);
        assert_eq!(config.reconnect.max_retries, 2);
        assert!(config.api.enabled);
        assert_eq!(config.api.bind, "127.0.0.1:4000");
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = SyncConfig::default().with_overrides(|name| match name {
            "FLEETSYNC_MAX_RETRIES" => Some("many".to_string()),
            "FLEETSYNC_TRANSPORT" => Some("carrier-pigeon".to_string()),
            _ => None,
        });

        assert_eq!(config.reconnect.max_retries, 5);
        assert_eq!(config.transport.kind, TransportKind::Websocket);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport]\nurl = \"ws://localhost:7000/ws\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.transport.url, "ws://localhost:7000/ws");
    }

    #[test]
    fn test_load_config_reports_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport\nurl = 1").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/fleetsync.toml").is_err());
    }
}
