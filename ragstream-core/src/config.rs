//! Configuration system for Ragstream.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/ragstream/config.toml` and/or
//! `.ragstream/config.toml` in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub chat: ChatConfig,
    pub ingestion: IngestionConfig,
    pub connectors: ConnectorsConfig,
    /// Bounded queue size for each channel's outbound and inbound frames.
    pub channel_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            chat: ChatConfig::default(),
            ingestion: IngestionConfig::default(),
            connectors: ConnectorsConfig::default(),
            channel_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Reject values that would make the client misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_buffer == 0 {
            return Err(ConfigError::Invalid {
                message: "channel_buffer must be at least 1".to_string(),
            });
        }
        if self.ingestion.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "ingestion.poll_interval_ms must be positive".to_string(),
            });
        }
        for (name, url, schemes) in [
            ("server.api_url", &self.server.api_url, ["http", "https"]),
            ("server.ws_url", &self.server.ws_url, ["ws", "wss"]),
        ] {
            let parsed = url::Url::parse(url).map_err(|e| ConfigError::Invalid {
                message: format!("{} is not a valid URL ({}): {}", name, url, e),
            })?;
            if !schemes.contains(&parsed.scheme()) {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "{} must use one of {:?}, got {}",
                        name,
                        schemes,
                        parsed.scheme()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Backend addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL for the REST endpoints (without the `/api` suffix).
    pub api_url: String,
    /// Base URL for the streaming endpoints (without the `/ws` suffix).
    pub ws_url: String,
    /// Per-request timeout for REST calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            ws_url: "ws://localhost:8000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Chat channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Fail a turn when no frame arrives for this long. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall_timeout_secs: Option<u64>,
}

impl ChatConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_secs.map(Duration::from_secs)
    }
}

/// Ingestion channel and polling-fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Give up on a silent ingestion channel after this long. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall_timeout_secs: Option<u64>,
    /// Interval between polls once the push channel is lost.
    pub poll_interval_ms: u64,
    /// Maximum number of polls before giving up.
    pub max_poll_attempts: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: None,
            poll_interval_ms: 1000,
            max_poll_attempts: 30,
        }
    }
}

impl IngestionConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Connector coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorsConfig {
    /// Delay before the single refresh scheduled after a sync request.
    pub sync_refresh_delay_ms: u64,
}

impl Default for ConnectorsConfig {
    fn default() -> Self {
        Self {
            sync_refresh_delay_ms: 2000,
        }
    }
}

impl ConnectorsConfig {
    pub fn sync_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.sync_refresh_delay_ms)
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `RAGSTREAM_`)
/// 3. Workspace-local config (`.ragstream/config.toml`)
/// 4. User config (`~/.config/ragstream/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ClientConfig>,
) -> Result<ClientConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "ragstream", "ragstream") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".ragstream").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (RAGSTREAM_SERVER__API_URL, RAGSTREAM_CHAT__STALL_TIMEOUT_SECS, etc.)
    figment = figment.merge(Env::prefixed("RAGSTREAM_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: ClientConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a single TOML file layered over the defaults.
pub fn load_config_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let config: ClientConfig = Figment::from(Serialized::defaults(ClientConfig::default()))
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

/// Render a configuration as TOML, e.g. for `config show`.
pub fn to_toml(config: &ClientConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server.api_url, "http://localhost:8000");
        assert_eq!(config.server.ws_url, "ws://localhost:8000");
        assert!(config.chat.stall_timeout().is_none());
        assert_eq!(config.ingestion.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.ingestion.max_poll_attempts, 30);
        assert_eq!(
            config.connectors.sync_refresh_delay(),
            Duration::from_millis(2000)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = ClientConfig::default();
        config.chat.stall_timeout_secs = Some(120);
        let toml_str = to_toml(&config).unwrap();
        let restored: ClientConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.chat.stall_timeout_secs, Some(120));
        assert_eq!(restored.channel_buffer, 256);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = ClientConfig::default();
        overrides.server.api_url = "http://rag.internal:9000".into();
        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.server.api_url, "http://rag.internal:9000");
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".ragstream");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[server]
ws_url = "wss://rag.example.com"

[ingestion]
poll_interval_ms = 250
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.server.ws_url, "wss://rag.example.com");
        assert_eq!(config.ingestion.poll_interval_ms, 250);
        // Untouched fields keep their defaults.
        assert_eq!(config.ingestion.max_poll_attempts, 30);
    }

    #[test]
    fn test_load_config_file_missing() {
        let err = load_config_file(Path::new("/nonexistent/ragstream.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_validate_rejects_wrong_scheme() {
        let mut config = ClientConfig::default();
        config.server.ws_url = "http://localhost:8000".into();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.channel_buffer = 0;
        assert!(config.validate().is_err());
    }
}
