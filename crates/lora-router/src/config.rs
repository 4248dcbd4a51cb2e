//! Router configuration.
//!
//! Configuration for the router, including:
//! - Monitor endpoints every gateway is mirrored to
//! - Monitor link queue and reconnect backoff settings
//! - Logging

use std::path::Path;
use std::time::Duration;

use lora_monitor::{BackoffConfig, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::RouterError;

/// A monitor service the router mirrors gateway traffic to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorEndpoint {
    /// Unique name, used in logs and as the per-gateway monitor key.
    pub name: String,
    /// WebSocket base URL.
    pub url: String,
}

/// Reconnect backoff for monitor links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffSettings {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between retries.
    pub multiplier: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffSettings {
    /// Convert to the monitor link backoff policy.
    #[must_use]
    pub fn to_backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_dispatch_shutdown_timeout_ms() -> u64 {
    5_000
}

/// Main router configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    /// Monitor endpoints.
    #[serde(default)]
    pub monitors: Vec<MonitorEndpoint>,
    /// Capacity of each monitor link's downlink queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Monitor link backoff.
    #[serde(default)]
    pub backoff: BackoffSettings,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// How long a disconnecting gateway waits for in-flight monitor sends.
    #[serde(default = "default_dispatch_shutdown_timeout_ms")]
    pub dispatch_shutdown_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            monitors: Vec::new(),
            queue_capacity: default_queue_capacity(),
            backoff: BackoffSettings::default(),
            logging: LoggingConfig::default(),
            dispatch_shutdown_timeout_ms: default_dispatch_shutdown_timeout_ms(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RouterError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RouterError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, RouterError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RouterError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, RouterError> {
        toml::to_string_pretty(self)
            .map_err(|e| RouterError::Config(format!("failed to serialize config: {e}")))
    }

    /// A sample configuration with one local monitor.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            monitors: vec![MonitorEndpoint {
                name: "local".to_string(),
                url: "ws://localhost:8090/monitor".to_string(),
            }],
            ..Self::default()
        }
    }

    /// Shutdown timeout for in-flight monitor sends.
    #[must_use]
    pub fn dispatch_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_shutdown_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), RouterError> {
        let mut seen = std::collections::HashSet::new();
        for monitor in &self.monitors {
            if monitor.name.is_empty() {
                return Err(RouterError::Config(
                    "monitor name cannot be empty".to_string(),
                ));
            }

            if !seen.insert(monitor.name.as_str()) {
                return Err(RouterError::Config(format!(
                    "duplicate monitor name '{}'",
                    monitor.name
                )));
            }

            if !monitor.url.starts_with("ws://") && !monitor.url.starts_with("wss://") {
                return Err(RouterError::Config(format!(
                    "monitor '{}' url must start with ws:// or wss://",
                    monitor.name
                )));
            }
        }

        if self.queue_capacity == 0 {
            return Err(RouterError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.backoff.initial_delay_ms > self.backoff.max_delay_ms {
            return Err(RouterError::Config(
                "backoff.initial_delay_ms cannot exceed backoff.max_delay_ms".to_string(),
            ));
        }

        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(RouterError::Config(
                "backoff.multiplier must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }
}
