use crate::message::session::DEFAULT_PROTOCOL_VERSION;
use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CONFIG_DIR_ENV: &str = "BURDOCK_CONFIG_DIR";

/// Top-level client configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path the configuration was loaded from. Computed, never serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Identity stamped on outgoing messages (`[session]`).
    #[serde(default)]
    pub session: SessionConfig,

    /// Defaults for every execute request (`[execute]`).
    #[serde(default)]
    pub execute: ExecuteConfig,

    /// Finite stream and inbound queue sizing (`[streams]`).
    #[serde(default)]
    pub streams: StreamsConfig,

    /// Kernel endpoint (`[connection]`).
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Host-surface behavior (`[manager]`).
    #[serde(default)]
    pub manager: ManagerConfig,
}

// ── Session ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    /// Username placed in every message header. Default: `"burdock"`.
    #[serde(default = "default_username")]
    pub username: String,
    /// Wire protocol version placed in every header. Default: `"5.3"`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_username() -> String {
    "burdock".into()
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            protocol_version: default_protocol_version(),
        }
    }
}

// ── Execute ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteConfig {
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_true")]
    pub store_history: bool,
    #[serde(default)]
    pub allow_stdin: bool,
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self {
            silent: false,
            store_history: true,
            allow_stdin: false,
            stop_on_error: true,
        }
    }
}

// ── Streams ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StreamsConfig {
    /// Maximum pending items per finite stream. `0` means unbounded.
    /// Matching messages that arrive while a stream is full are dropped and
    /// counted; streamed operations fail with an overflow error when that
    /// happens.
    #[serde(default)]
    pub max_queue_depth: usize,
    /// Capacity of each per-channel inbound frame queue. Default: `256`.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

fn default_inbound_buffer() -> usize {
    256
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 0,
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

impl StreamsConfig {
    pub fn stream_capacity(&self) -> Option<usize> {
        (self.max_queue_depth > 0).then_some(self.max_queue_depth)
    }
}

// ── Connection ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionConfig {
    /// `host:port` of the kernel's JSON-lines endpoint.
    #[serde(default = "default_address")]
    pub address: String,
}

fn default_address() -> String {
    "127.0.0.1:9470".into()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

// ── Manager ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManagerConfig {
    /// Seconds to wait for any single host operation. `0` disables the limit.
    #[serde(default)]
    pub request_timeout_secs: u64,
}

impl ManagerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// Where the active config directory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResolutionSource {
    Explicit,
    EnvConfigDir,
    DefaultConfigDir,
}

impl ConfigResolutionSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "--config-dir",
            Self::EnvConfigDir => CONFIG_DIR_ENV,
            Self::DefaultConfigDir => "default",
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".burdock"))
}

/// Resolve the config directory: explicit path, then `BURDOCK_CONFIG_DIR`,
/// then `~/.burdock`.
pub fn resolve_config_dir(explicit: Option<&Path>) -> Result<(PathBuf, ConfigResolutionSource)> {
    if let Some(dir) = explicit {
        return Ok((dir.to_path_buf(), ConfigResolutionSource::Explicit));
    }
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok((PathBuf::from(dir), ConfigResolutionSource::EnvConfigDir));
        }
    }
    Ok((default_config_dir()?, ConfigResolutionSource::DefaultConfigDir))
}

impl Config {
    /// Load `config.toml` from the resolved directory. A missing file yields
    /// defaults; nothing is written.
    pub async fn load(config_dir: Option<&Path>) -> Result<Self> {
        let (dir, source) = resolve_config_dir(config_dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);

        let (mut config, found) = if fs::try_exists(&config_path).await.unwrap_or(false) {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            (config, true)
        } else {
            (Config::default(), false)
        };
        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            source = source.as_str(),
            found,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate values that would otherwise fail later at arbitrary points.
    pub fn validate(&self) -> Result<()> {
        if self.session.username.trim().is_empty() {
            anyhow::bail!("session.username must not be empty");
        }
        if self.session.protocol_version.trim().is_empty() {
            anyhow::bail!("session.protocol_version must not be empty");
        }
        if self.connection.address.trim().is_empty() {
            anyhow::bail!("connection.address must not be empty");
        }
        if self.streams.inbound_buffer == 0 {
            anyhow::bail!("streams.inbound_buffer must be greater than 0");
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(username) = lookup("BURDOCK_USERNAME") {
            self.session.username = username;
        }
        if let Some(address) = lookup("BURDOCK_CONNECT") {
            self.connection.address = address;
        }
        if let Some(raw) = lookup("BURDOCK_REQUEST_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.manager.request_timeout_secs = secs,
                Err(_) => tracing::warn!(
                    value = %raw,
                    "Ignoring invalid BURDOCK_REQUEST_TIMEOUT_SECS"
                ),
            }
        }
    }

    /// Write the config atomically to `config_path`.
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }
        tracing::debug!(path = %self.config_path.display(), "Config saved");
        Ok(())
    }

    /// JSON schema of the config file.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}
