//! modipc configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ipc::{CreateFailurePolicy, EndpointName, ServiceConfig};

/// Main modipc configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Endpoint naming and buffering
    pub endpoint: EndpointConfig,

    /// Session limits
    pub sessions: SessionsConfig,

    /// Endpoint creation policy
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        self.service_config().validate().context("Invalid configuration")?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .modipc.yml
        let local_config = PathBuf::from(".modipc.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/modipc/modipc.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("modipc").join("modipc.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Runtime settings for the IPC service
    pub fn service_config(&self) -> ServiceConfig {
        let on_create_failure = match self.dispatch.on_create_failure {
            FailurePolicyKind::Stop => CreateFailurePolicy::Stop,
            FailurePolicyKind::Retry => CreateFailurePolicy::Retry {
                max_retries: self.dispatch.max_retries,
                backoff: Duration::from_millis(self.dispatch.retry_backoff_ms),
            },
        };

        ServiceConfig {
            buffer_size: self.endpoint.buffer_size,
            max_sessions: self.sessions.max_concurrent,
            drain_timeout: Duration::from_millis(self.sessions.drain_timeout_ms),
            on_create_failure,
        }
    }
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint name clients connect to
    pub name: EndpointName,

    /// Request buffer capacity in bytes
    #[serde(rename = "buffer-size")]
    pub buffer_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: EndpointName::default(),
            buffer_size: crate::ipc::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Maximum concurrently running sessions (unset = unbounded)
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: Option<usize>,

    /// How long shutdown waits for in-flight sessions
    #[serde(rename = "drain-timeout-ms")]
    pub drain_timeout_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            drain_timeout_ms: 5000,
        }
    }
}

/// What to do when the endpoint cannot be created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicyKind {
    #[default]
    Stop,
    Retry,
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    #[serde(rename = "on-create-failure")]
    pub on_create_failure: FailurePolicyKind,

    /// Retries before giving up (retry policy only)
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Initial backoff, doubled per retry
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            on_create_failure: FailurePolicyKind::Stop,
            max_retries: 5,
            retry_backoff_ms: 100,
        }
    }
}
