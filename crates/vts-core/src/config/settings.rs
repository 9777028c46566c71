use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vts_rpc::AuthenticationParams;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_plugin_name")]
    pub plugin_name: String,

    #[serde(default = "default_plugin_developer")]
    pub plugin_developer: String,

    /// Base64-encoded 128x128 PNG
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_icon: Option<String>,

    /// PNG file to encode when `plugin_icon` is not set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_icon_path: Option<PathBuf>,

    /// Token store scope
    #[serde(default = "default_store")]
    pub store: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub timings: Timings,
}

fn default_endpoint() -> String {
    "ws://localhost:8001".to_string()
}

fn default_plugin_name() -> String {
    "vts-link".to_string()
}

fn default_plugin_developer() -> String {
    "vts-link".to_string()
}

fn default_store() -> String {
    "default".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            plugin_name: default_plugin_name(),
            plugin_developer: default_plugin_developer(),
            plugin_icon: None,
            plugin_icon_path: None,
            store: default_store(),
            request_timeout_ms: default_request_timeout_ms(),
            timings: Timings::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    ///
    /// A relative `pluginIconPath` is resolved against the config file's
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;

        if let (Some(icon), Some(dir)) = (&config.plugin_icon_path, path.parent())
            && icon.is_relative()
        {
            config.plugin_icon_path = Some(dir.join(icon));
        }

        Ok(config)
    }

    /// Check the values a connection cannot work without.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        vts_rpc::validate_endpoint(&self.endpoint).map_err(|e| Error::Config(e.to_string()))?;

        if self.plugin_name.trim().is_empty() {
            return Err(Error::Config("pluginName must not be empty".to_string()));
        }
        if self.plugin_developer.trim().is_empty() {
            return Err(Error::Config(
                "pluginDeveloper must not be empty".to_string(),
            ));
        }
        if self.store.trim().is_empty() {
            return Err(Error::Config("store must not be empty".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config(
                "requestTimeoutMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Build the immutable connection identity, encoding the icon file if one
    /// is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the icon file cannot be read.
    pub fn endpoint_config(&self) -> Result<EndpointConfig> {
        self.validate()?;

        let icon = match (&self.plugin_icon, &self.plugin_icon_path) {
            (Some(icon), _) => Some(icon.clone()),
            (None, Some(path)) => Some(STANDARD.encode(std::fs::read(path)?)),
            (None, None) => None,
        };

        Ok(EndpointConfig {
            endpoint: self.endpoint.clone(),
            plugin_name: self.plugin_name.clone(),
            plugin_developer: self.plugin_developer.clone(),
            plugin_icon: icon,
            store: self.store.clone(),
        })
    }
}

/// Retry and reconnect delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    /// Delay before reconnecting after an unsolicited close
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,

    /// Delay before re-checking an inactive or unreachable API
    #[serde(default = "default_liveness_retry_ms")]
    pub liveness_retry_ms: u64,

    /// Delay before retrying a failed authentication
    #[serde(default = "default_auth_retry_ms")]
    pub auth_retry_ms: u64,

    /// Delay before the next step of an in-progress authentication
    #[serde(default = "default_requeue_ms")]
    pub requeue_ms: u64,
}

fn default_reconnect_ms() -> u64 {
    5000
}

fn default_liveness_retry_ms() -> u64 {
    5000
}

fn default_auth_retry_ms() -> u64 {
    20_000
}

fn default_requeue_ms() -> u64 {
    1
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconnect_ms: default_reconnect_ms(),
            liveness_retry_ms: default_liveness_retry_ms(),
            auth_retry_ms: default_auth_retry_ms(),
            requeue_ms: default_requeue_ms(),
        }
    }
}

impl Timings {
    #[must_use]
    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    #[must_use]
    pub fn liveness_retry(&self) -> Duration {
        Duration::from_millis(self.liveness_retry_ms)
    }

    #[must_use]
    pub fn auth_retry(&self) -> Duration {
        Duration::from_millis(self.auth_retry_ms)
    }

    #[must_use]
    pub fn requeue(&self) -> Duration {
        Duration::from_millis(self.requeue_ms)
    }
}

/// Identity of one connection: where to connect and who to authenticate as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub endpoint: String,
    pub plugin_name: String,
    pub plugin_developer: String,
    pub plugin_icon: Option<String>,
    /// Token store scope
    pub store: String,
}

impl EndpointConfig {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        plugin_name: impl Into<String>,
        plugin_developer: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            plugin_name: plugin_name.into(),
            plugin_developer: plugin_developer.into(),
            plugin_icon: None,
            store: default_store(),
        }
    }

    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.plugin_icon = Some(icon.into());
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: impl Into<String>) -> Self {
        self.store = store.into();
        self
    }

    /// Payload for `AuthenticationTokenRequest` (no token) and
    /// `AuthenticationRequest` (with token).
    #[must_use]
    pub fn authentication_params(&self, token: Option<String>) -> AuthenticationParams {
        AuthenticationParams {
            plugin_name: self.plugin_name.clone(),
            plugin_developer: self.plugin_developer.clone(),
            plugin_icon: self.plugin_icon.clone(),
            authentication_token: token,
        }
    }
}
