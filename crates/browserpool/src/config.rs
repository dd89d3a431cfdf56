//! Runtime configuration.
//!
//! Settings come from an optional TOML file plus `BROWSERPOOL_*` environment
//! overrides (double underscore separates sections, e.g.
//! `BROWSERPOOL_SESSIONS__MAX_SESSIONS=10`). Every field has a default, so
//! the service runs with no config at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::discovery::{DiscoveryConfig, DiscoveryStrategy};
use crate::session::ControllerConfig;

const ENV_PREFIX: &str = "BROWSERPOOL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub sessions: SessionSettings,
    pub ports: PortSettings,
    pub discovery: DiscoverySettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Hard cap on concurrently live sessions.
    pub max_sessions: usize,
    /// Image each sandbox container runs.
    pub image: String,
    /// Container name prefix; the session id is appended.
    pub container_name_prefix: String,
    /// Port the browser exposes inside the container.
    pub container_port: u16,
    /// Deadline for a container to reach running state.
    pub start_timeout_secs: u64,
    /// Interval between container state polls.
    pub poll_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 20,
            image: "chromium-cdp".to_string(),
            container_name_prefix: "browser-".to_string(),
            container_port: 9222,
            start_timeout_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// First host port handed to sandboxes (inclusive).
    pub start: u16,
    /// Last host port handed to sandboxes (inclusive).
    pub end: u16,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            start: 9100,
            end: 9120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Pause before the first discovery attempt.
    pub grace_ms: u64,
    /// Per-strategy timeout.
    pub strategy_timeout_secs: u64,
    /// Strategy order.
    pub order: Vec<DiscoveryStrategy>,
    /// Skip public-host resolution and use this address in endpoints.
    pub public_host: Option<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        let defaults = DiscoveryConfig::default();
        Self {
            grace_ms: defaults.grace.as_millis() as u64,
            strategy_timeout_secs: defaults.strategy_timeout.as_secs(),
            order: defaults.order,
            public_host: None,
        }
    }
}

/// Which `SessionStore` backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Relational store (sqlite file).
    #[default]
    Sqlite,
    /// Document store (one JSON file per session).
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: StoreBackend,
    /// Database file for the sqlite backend.
    pub path: PathBuf,
    /// Document directory for the json backend.
    pub json_dir: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("data/browserpool.db"),
            json_dir: PathBuf::from("data/sessions"),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file and the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.ports.start > self.ports.end {
            bail!(
                "ports.start ({}) must not exceed ports.end ({})",
                self.ports.start,
                self.ports.end
            );
        }
        if self.sessions.max_sessions == 0 {
            bail!("sessions.max_sessions must be at least 1");
        }
        if self.discovery.order.is_empty() {
            bail!("discovery.order must name at least one strategy");
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_sessions: self.sessions.max_sessions,
            image: self.sessions.image.clone(),
            container_name_prefix: self.sessions.container_name_prefix.clone(),
            container_port: self.sessions.container_port,
            start_timeout: Duration::from_secs(self.sessions.start_timeout_secs),
            poll_interval: Duration::from_millis(self.sessions.poll_interval_ms),
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            grace: Duration::from_millis(self.discovery.grace_ms),
            strategy_timeout: Duration::from_secs(self.discovery.strategy_timeout_secs),
            order: self.discovery.order.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.ports.start, 9100);
        assert_eq!(settings.ports.end, 9120);
        assert_eq!(settings.sessions.max_sessions, 20);
        assert_eq!(settings.database.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let mut settings = Settings::default();
        settings.ports.start = 9121;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_deserialize_from_toml() {
        let toml = r#"
            [server]
            port = 9000

            [sessions]
            max_sessions = 5
            image = "my-browser:latest"

            [ports]
            start = 9200
            end = 9205

            [discovery]
            order = ["http", "logs"]
            public_host = "203.0.113.7"

            [database]
            backend = "json"
        "#;

        let settings: Settings = toml::from_str(toml).expect("parse");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.sessions.max_sessions, 5);
        assert_eq!(settings.ports.start, 9200);
        assert_eq!(
            settings.discovery.order,
            vec![DiscoveryStrategy::Http, DiscoveryStrategy::Logs]
        );
        assert_eq!(settings.discovery.public_host.as_deref(), Some("203.0.113.7"));
        assert_eq!(settings.database.backend, StoreBackend::Json);
    }
}
