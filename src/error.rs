//! Top-level error type aggregating the per-layer errors

use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("Transport error: {0}")]
    Mqtt(#[from] crate::transport::mqtt::MqttError),
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::agent::LifecycleError),
    #[error("State error: {0}")]
    State(#[from] crate::state::StateError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateError;

    #[test]
    fn test_error_conversion_and_display() {
        let error: AgentError = StateError::InvalidDwell.into();
        assert!(error.to_string().contains("positive"));
    }
}
