//! Config schema types (server, bridge, dispatch, channel accounts, storage).
//!
//! Per-account channel configuration is carried as opaque JSON here; the
//! channel crates own the typed shape and deserialize it when an account
//! starts.

use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoleryConfig {
    pub server: ServerConfig,
    pub bridge: BridgeSettings,
    pub dispatch: DispatchConfig,
    pub channels: ChannelsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP server configuration (health route + bridge upgrade endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8440,
        }
    }
}

/// Settings for bridge client sessions.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Shared secret bridge clients must present in their connect request.
    /// When unset, any client may connect.
    #[serde(serialize_with = "serialize_opt_secret")]
    pub auth_token: Option<Secret<String>>,

    /// How long an outbound RPC waits for the client's response (ms).
    pub request_timeout_ms: u64,

    /// Keep-alive ping interval (ms). 0 disables pings.
    pub ping_interval_ms: u64,
}

impl std::fmt::Debug for BridgeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSettings")
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("ping_interval_ms", &self.ping_interval_ms)
            .finish()
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            auth_token: None,
            request_timeout_ms: 30_000,
            ping_interval_ms: 30_000,
        }
    }
}

impl BridgeSettings {
    /// Expose the configured token for handshake comparison.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.auth_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

fn serialize_opt_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Inbound dispatch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default debounce window for coalescing rapid messages (ms).
    /// Accounts may override; 0 disables buffering.
    pub debounce_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 800 }
    }
}

/// Channel account configuration, keyed `channel id -> account id -> config`.
///
/// The inner value is the channel crate's account config shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Bridge-backed accounts, keyed by account ID.
    #[serde(default)]
    pub bridge: HashMap<String, serde_json::Value>,
}

impl ChannelsConfig {
    /// Accounts for a channel by its id. `None` for channels this build
    /// does not know about.
    #[must_use]
    pub fn accounts_for(&self, channel_id: &str) -> Option<&HashMap<String, serde_json::Value>> {
        match channel_id {
            "bridge" => Some(&self.bridge),
            _ => None,
        }
    }
}

/// Where runtime state (pairing records, account registry) is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for JSON state files. Defaults to the platform data dir.
    pub state_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { state_dir: None }
    }
}

/// Logging configuration (CLI flags and `RUST_LOG` take precedence).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter, e.g. "info" or "volery_bridge=debug".
    pub level: String,
    /// Emit JSON-formatted log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Metrics and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether to expose the `/metrics` Prometheus endpoint.
    pub prometheus_endpoint: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_endpoint: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = VoleryConfig::default();
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.bridge.request_timeout_ms, 30_000);
        assert_eq!(cfg.dispatch.debounce_ms, 800);
        assert!(cfg.bridge.token().is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: VoleryConfig = toml::from_str(
            r#"
            [server]
            port = 9100

            [bridge]
            auth_token = "hunter2"

            [channels.bridge.main]
            dm_policy = "open"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.bridge.token(), Some("hunter2"));
        assert!(cfg.channels.bridge.contains_key("main"));
        // untouched sections keep defaults
        assert_eq!(cfg.dispatch.debounce_ms, 800);
    }

    #[test]
    fn debug_redacts_token() {
        let cfg: VoleryConfig = toml::from_str("[bridge]\nauth_token = \"s3cret\"\n").unwrap();
        let debug = format!("{:?}", cfg.bridge);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn accounts_for_unknown_channel_is_none() {
        let cfg = ChannelsConfig::default();
        assert!(cfg.accounts_for("carrier-pigeon").is_none());
    }
}
