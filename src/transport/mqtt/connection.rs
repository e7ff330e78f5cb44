//! Pure connection state management for the MQTT transport
//!
//! Contains the connection state machine data, reconnect backoff policy, and
//! the option builder that turns [`MqttSection`] into `rumqttc` options
//! (including mutual TLS from PEM paths and the persistent-session flag).

use crate::config::MqttSection;
use rumqttc::{MqttOptions, TlsConfiguration, Transport as RumqttcTransport};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Connection state as observed by the rest of the agent. Transitions are
/// driven by transport events; consumers only react to them.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Session established and confirmed by the broker
    Connected,
    /// Connectivity lost mid-session; the supervisor is retrying
    Interrupted(String),
    /// Cleanly disconnected
    Disconnected(String),
    /// Unrecoverable: retries exhausted or a subscription was rejected
    PermanentlyDisconnected(String),
}

impl ConnectionState {
    /// Publishes are only allowed on a confirmed session.
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn can_subscribe(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Reconnection backoff policy
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds, one entry per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![1_000, 2_000, 5_000, 10_000],
            sustained_delay: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based), following the pattern and
    /// sustaining its tail.
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        if self.backoff_pattern.is_empty() {
            return self.sustained_delay;
        }
        let index = attempt.saturating_sub(1) as usize;
        *self
            .backoff_pattern
            .get(index)
            .unwrap_or(&self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publish failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscribe failed")]
    SubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("Failed to read TLS material from {path}")]
    TlsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid TLS configuration: {0}")]
    InvalidTls(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Server rejected subscription to topic: {0}")]
    SubscriptionRejected(String),
}

fn read_pem(path: &Path) -> Result<Vec<u8>, MqttError> {
    std::fs::read(path).map_err(|source| MqttError::TlsRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Build `MqttOptions` from configuration. TLS is enabled when a root CA is
/// configured; client cert/key enable mutual TLS and require the root CA.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let mut mqtt_options = MqttOptions::new(client_id, &config.endpoint, config.port);

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    // Persistent sessions let the broker retain subscription state across
    // interruptions; session_present on ConnAck tells us whether it did.
    mqtt_options.set_clean_session(!config.persistent_session);

    match (&config.root_ca, &config.cert, &config.key) {
        (Some(ca_path), Some(cert_path), Some(key_path)) => {
            let tls = TlsConfiguration::Simple {
                ca: read_pem(ca_path)?,
                alpn: None,
                client_auth: Some((read_pem(cert_path)?, read_pem(key_path)?)),
            };
            mqtt_options.set_transport(RumqttcTransport::Tls(tls));
        }
        (Some(ca_path), None, None) => {
            let tls = TlsConfiguration::Simple {
                ca: read_pem(ca_path)?,
                alpn: None,
                client_auth: None,
            };
            mqtt_options.set_transport(RumqttcTransport::Tls(tls));
        }
        (None, Some(_), Some(_)) => {
            return Err(MqttError::InvalidTls(
                "client cert/key require a root_ca".to_string(),
            ));
        }
        (_, Some(_), None) | (_, None, Some(_)) => {
            return Err(MqttError::InvalidTls(
                "cert and key must be provided together".to_string(),
            ));
        }
        (None, None, None) => {
            // Plain TCP, for local development brokers
        }
    }

    Ok(mqtt_options)
}
