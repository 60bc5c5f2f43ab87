use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;

fn default_client_name() -> String {
    "ferrolink".to_string()
}

fn default_voice_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub client: ClientConfig,
    /// Node instances registered at startup. More can be added at runtime.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    pub logging: Option<LoggingConfig>,
}

/// Identity this client presents to every node, plus handshake bounds.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    /// Bot user id, sent as the `User-Id` handshake header.
    pub user_id: u64,
    /// Sent as the `Client-Name` handshake header.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Bound on the two-confirmation voice handshake, in seconds.
    #[serde(default = "default_voice_timeout")]
    pub voice_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Voice region this node should prefer serving, e.g. "rotterdam".
    #[serde(default)]
    pub region: Option<String>,
    /// Display name override.
    #[serde(default)]
    pub name: Option<String>,
}

impl NodeConfig {
    /// `name` override, or `region::host::port`.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.region {
            Some(region) => format!("{}::{}::{}", region, self.host, self.port),
            None => format!("{}::{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub filters: Option<String>,
}

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        tracing::info!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }
}
