//! Agent configuration
//!
//! Configuration comes from an optional TOML file plus CLI overrides; the
//! merged result is validated before anything connects. The broker endpoint
//! is the only field with no usable default.

use crate::protocol::topics::{validate_client_id, TopicSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Complete agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub tasking: TaskingSection,
}

/// Identity of this agent instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// MQTT client identifier (must match [a-zA-Z0-9._-]+)
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker hostname, without a port
    #[serde(default)]
    pub endpoint: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client certificate path, PEM (mutual TLS)
    pub cert: Option<PathBuf>,
    /// Client private key path, PEM (mutual TLS)
    pub key: Option<PathBuf>,
    /// Root CA path, PEM, for brokers outside the default trust store
    pub root_ca: Option<PathBuf>,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Request a persistent broker session (clean_session = false)
    #[serde(default = "default_persistent_session")]
    pub persistent_session: bool,
}

/// Tasking behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskingSection {
    /// Initial dwell interval in seconds (must be > 0)
    #[serde(default = "default_dwell_secs")]
    pub dwell_secs: u64,
    /// Prefix for the tasking/results/heartbeat topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Register the shell-execution task handler
    #[serde(default)]
    pub allow_exec: bool,
}

fn default_client_id() -> String {
    "beacon_client".to_string()
}

fn default_port() -> u16 {
    8883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_persistent_session() -> bool {
    true
}

fn default_dwell_secs() -> u64 {
    crate::state::DEFAULT_DWELL_SECS
}

fn default_topic_prefix() -> String {
    "c2".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            port: default_port(),
            cert: None,
            key: None,
            root_ca: None,
            keep_alive_secs: default_keep_alive_secs(),
            persistent_session: default_persistent_session(),
        }
    }
}

impl Default for TaskingSection {
    fn default() -> Self {
        Self {
            dwell_secs: default_dwell_secs(),
            topic_prefix: default_topic_prefix(),
            allow_exec: false,
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID: {0}")]
    InvalidClientId(crate::protocol::ValidationError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.agent.client_id).map_err(ConfigError::InvalidClientId)?;

        if self.mqtt.endpoint.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker endpoint is required (--endpoint or [mqtt].endpoint)".to_string(),
            ));
        }

        if self.mqtt.cert.is_some() != self.mqtt.key.is_some() {
            return Err(ConfigError::InvalidConfig(
                "cert and key must be provided together".to_string(),
            ));
        }

        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than zero".to_string(),
            ));
        }

        if self.tasking.dwell_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "dwell_secs must be greater than zero".to_string(),
            ));
        }

        TopicSet::new(&self.tasking.topic_prefix)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        Ok(())
    }

    /// The topic set derived from the configured prefix. Call after
    /// [`validate`](Self::validate).
    pub fn topics(&self) -> Result<TopicSet, ConfigError> {
        TopicSet::new(&self.tasking.topic_prefix)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}
