//! Proxy configuration: TOML file + CLI overrides.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Top-level config file structure.
///
/// # TOML Example
///
/// ```toml
/// [proxy]
/// front_port = 4001
/// back_port = 4002
/// ice_servers = ["stun://stun.example.net:3478"]
///
/// [auth]
/// source1 = "dummyToken"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub proxy: ProxySection,
    /// Pre-shared tokens: source name → token. An empty table admits no
    /// back sources.
    #[serde(default)]
    pub auth: HashMap<String, String>,
}

/// `[proxy]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    /// Viewer-facing WebSocket listen port.
    #[serde(default = "default_front_port")]
    pub front_port: u16,
    /// Source-facing WebSocket listen port.
    #[serde(default = "default_back_port")]
    pub back_port: u16,
    /// ICE servers handed to back sources at registration time.
    #[serde(default)]
    pub ice_servers: Vec<String>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            front_port: default_front_port(),
            back_port: default_back_port(),
            ice_servers: Vec::new(),
        }
    }
}

fn default_front_port() -> u16 {
    4001
}
fn default_back_port() -> u16 {
    4002
}

/// Resolved proxy configuration (file values with CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub front_port: u16,
    pub back_port: u16,
    pub ice_servers: Vec<String>,
    pub back_auth_tokens: HashMap<String, String>,
}

impl ProxyConfig {
    /// Load configuration from a TOML file, then apply CLI overrides.
    ///
    /// A missing file yields defaults; CLI arguments, when `Some`, take
    /// precedence over the file values.
    pub fn load(
        config_path: Option<&Path>,
        cli_front_port: Option<u16>,
        cli_back_port: Option<u16>,
    ) -> anyhow::Result<Self> {
        let file_config = match config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config {}", path.display()))?;
                toml::from_str::<ConfigFile>(&content)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        Ok(Self {
            front_port: cli_front_port.unwrap_or(file_config.proxy.front_port),
            back_port: cli_back_port.unwrap_or(file_config.proxy.back_port),
            ice_servers: file_config.proxy.ice_servers,
            back_auth_tokens: file_config.auth,
        })
    }
}
