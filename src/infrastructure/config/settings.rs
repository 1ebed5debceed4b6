use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Channels subscribed at startup by the binary
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint
    #[serde(default = "default_server_url")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Initial access token
    pub token: Option<String>,
    /// Credential exchanged for a new access token
    pub refresh_token: Option<String>,
    /// Token refresh endpoint (POST)
    pub refresh_url: Option<String>,
    /// Allow downgrading to a read-only guest session
    #[serde(default)]
    pub allow_guest_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// 0 = unlimited
    #[serde(default)]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Bound on one full credential resolution (all handshake attempts)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// How long `send` may wait for outbound queue space
    #[serde(default = "default_send_grace_ms")]
    pub send_grace_ms: u64,
    /// Ping interval while connected, 0 disables
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Ring-buffer cap
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// REST fallback endpoint for bulk sync
    pub sync_url: Option<String>,
    /// Downtime after which a reconnect triggers a REST sync
    #[serde(default = "default_sync_after_downtime_secs")]
    pub sync_after_downtime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_server_url() -> String {
    "ws://localhost:8081/ws".to_string()
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_send_grace_ms() -> u64 {
    250
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_capacity() -> usize {
    100
}

fn default_sync_after_downtime_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.url", default_server_url())?
            .set_default("reconnect.base_delay_ms", default_base_delay_ms())?
            .set_default("reconnect.max_delay_ms", default_max_delay_ms())?
            .set_default("reconnect.jitter_ratio", default_jitter_ratio())?
            .set_default("reconnect.max_attempts", 0)?
            .set_default("notifications.capacity", default_capacity() as u64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ARA__SERVER__URL, ARA__AUTH__TOKEN, ARA__RECONNECT__MAX_ATTEMPTS, ...
            .add_source(
                Environment::with_prefix("ARA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("channels"),
            );

        builder.build()?.try_deserialize()
    }
}

impl ConnectionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn send_grace(&self) -> Duration {
        Duration::from_millis(self.send_grace_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            max_attempts: 0,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            send_grace_ms: default_send_grace_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            sync_url: None,
            sync_after_downtime_secs: default_sync_after_downtime_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.url, "ws://localhost:8081/ws");
        assert_eq!(settings.reconnect.max_attempts, 0);
        assert_eq!(settings.connection.send_grace_ms, 250);
        assert_eq!(settings.notifications.capacity, 100);
        assert!(!settings.auth.allow_guest_mode);
    }

    #[test]
    fn test_ping_interval_disabled() {
        let config = ConnectionConfig {
            ping_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.ping_interval().is_none());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let json = serde_json::json!({
            "server": { "url": "wss://example.test/ws" },
            "auth": { "token": "abc", "allow_guest_mode": true },
            "reconnect": { "max_attempts": 5 }
        });
        let settings: Settings = serde_json::from_value(json).unwrap();
        assert_eq!(settings.server.url, "wss://example.test/ws");
        assert_eq!(settings.auth.token.as_deref(), Some("abc"));
        assert!(settings.auth.allow_guest_mode);
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.reconnect.base_delay_ms, 500);
        assert_eq!(settings.connection.handshake_timeout_ms, 10_000);
    }
}
