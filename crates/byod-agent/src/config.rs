//! Agent configuration.
//!
//! Every section is `#[serde(default)]` so a partial TOML file (or none at
//! all) yields a runnable configuration; the binary layers file and
//! environment sources on top of these defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const APP_NAME: &str = "byod-agent";

/// Environment overrides look like `BYOD_AGENT__SERVER__PORT`.
pub const ENV_PREFIX: &str = "BYOD_AGENT";

/// Errors raised while validating configuration values.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("environment variable {0} is not set")]
    EnvVarNotFound(String),

    #[error("environment variable {0} is empty")]
    EnvVarEmpty(String),

    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub tools: ToolsConfig,
    pub account: AccountConfig,
    pub auth: AuthConfig,
    pub fleet: FleetConfig,
    pub tunnel: TunnelConfig,
    pub discovery: DiscoveryConfig,
    pub automation: AutomationConfig,
}

/// Inbound HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path prefix shared with the automation servers (`/wd/hub`).
    pub base_path: String,
    pub shutdown_grace_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4723,
            base_path: "/wd/hub".to_string(),
            shutdown_grace_secs: 5,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the agent's working tree. `~` and env vars are expanded.
    pub work_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: "~/.lambdatest".to_string(),
        }
    }
}

/// External binaries. Unset device tools resolve inside the assets directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub adb: Option<String>,
    pub go_ios: Option<String>,
    pub appium: String,
    pub lsof: String,
    pub command_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            adb: None,
            go_ios: None,
            appium: "appium".to_string(),
            lsof: "lsof".to_string(),
            command_timeout_secs: 120,
        }
    }
}

impl ToolsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Credentials of the host owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub user: String,
    /// Access key. `env:VAR_NAME` reads the key from the environment.
    pub key: String,
}

impl AccountConfig {
    /// Resolve the owner's username and access key.
    pub fn resolve(&self) -> Result<(String, String), ConfigValidationError> {
        if self.user.is_empty() {
            return Err(ConfigValidationError::Missing("account.user"));
        }
        let key = match self.key.strip_prefix("env:") {
            Some(var_name) => match std::env::var(var_name) {
                Ok(secret) if !secret.is_empty() => secret,
                Ok(_) => return Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                Err(_) => return Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
            },
            None if self.key.is_empty() => return Err(ConfigValidationError::Missing("account.key")),
            None => self.key.clone(),
        };
        Ok((self.user.clone(), key))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Credential-pair validation endpoint.
    pub basic_url: String,
    /// Bearer-token validation endpoint. Bearer auth is refused when unset.
    pub bearer_url: Option<String>,
    pub jwt_flush_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            basic_url: "https://stage-accounts.lambdatestinternal.com/api/user/token/auth"
                .to_string(),
            bearer_url: None,
            jwt_flush_interval_secs: 30 * 60,
            request_timeout_secs: 10,
        }
    }
}

impl AuthConfig {
    pub fn jwt_flush_interval(&self) -> Duration {
        Duration::from_secs(self.jwt_flush_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub sync_url: String,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Port advertised to the scheduler; normally the server port.
    pub host_port: u16,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            sync_url: "https://mobile-api-gauravb-byod-dev.lambdatestinternal.com/mobile-automation/api/v1/byod/devices/sync".to_string(),
            heartbeat_interval_secs: 60,
            request_timeout_secs: 10,
            host_port: 4723,
        }
    }
}

impl FleetConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub binary: String,
    /// `prod` or `stage`.
    pub env: String,
    pub info_port: u16,
    pub id_retries: u32,
    pub id_retry_delay_secs: u64,
    pub startup_delay_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            binary: "./LT".to_string(),
            env: "prod".to_string(),
            info_port: 8000,
            id_retries: 1,
            id_retry_delay_secs: 1,
            startup_delay_secs: 4,
        }
    }
}

impl TunnelConfig {
    pub fn info_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v1.0/info", self.info_port)
    }

    pub fn id_retry_delay(&self) -> Duration {
        Duration::from_secs(self.id_retry_delay_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub interval_secs: u64,
    /// Base URL serving `diskimages/<version>.zip` bundles.
    pub assets_url: Option<String>,
    /// Upper bound on joining background loops at shutdown.
    pub join_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            assets_url: None,
            join_timeout_secs: 10,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// First port handed out by the port registry.
    pub base_port: u16,
    /// Fixed wait after spawning an automation server.
    pub settle_delay_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            base_port: 4724,
            settle_delay_ms: 5000,
        }
    }
}

impl AutomationConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl AgentConfig {
    /// Layer the TOML file and the environment over the defaults. A missing
    /// file is created with the defaults first.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::write_default(path)?;
        }

        let built = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("reading config {}", path.display()))?;
        Ok(built.try_deserialize()?)
    }

    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {parent:?}"))?;
        }

        let toml = toml::to_string_pretty(&Self::default())
            .context("serializing default config to TOML")?;
        let body = format!(
            "# Configuration for {APP_NAME}\n# File: {}\n\n{toml}",
            path.display()
        );
        fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
    }
}

/// `$XDG_CONFIG_HOME/byod-agent/config.toml`, falling back to the platform
/// config dir and then `~/.config`.
pub fn default_config_file() -> Result<PathBuf> {
    let dir = match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir).join(APP_NAME),
        None => match dirs::config_dir() {
            Some(dir) => dir.join(APP_NAME),
            None => dirs::home_dir()
                .map(|home| home.join(".config").join(APP_NAME))
                .ok_or_else(|| anyhow!("unable to determine configuration directory"))?,
        },
    };
    Ok(dir.join("config.toml"))
}
