//! Transport layer for the tasking channel
//!
//! Abstracts the broker session behind a trait so the agent lifecycle can be
//! exercised against a mock, with the MQTT implementation underneath.

use crate::protocol::{TaskMessage, TaskResult};

pub mod mqtt;

/// Transport session contract consumed by the agent core.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish the broker session; returns once the broker confirms it.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Request graceful shutdown and wait for the session to close.
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Subscribe to the tasking topic and track it for re-subscription.
    async fn subscribe_to_tasking(&self) -> Result<(), Self::Error>;

    /// Publish a task result on the results topic.
    async fn publish_result(&self, result: &TaskResult) -> Result<(), Self::Error>;

    /// Publish the liveness envelope on the heartbeat topic.
    async fn publish_heartbeat(&self) -> Result<(), Self::Error>;

    /// Attach the channel inbound task messages are forwarded on.
    fn set_task_sender(&self, sender: tokio::sync::mpsc::Sender<TaskMessage>);

    /// Current connection state.
    fn connection_state(&self) -> mqtt::ConnectionState;

    /// Whether the session is unrecoverable (retries exhausted or a
    /// subscription was rejected).
    fn is_permanently_disconnected(&self) -> bool;
}

/// Type alias for the production transport
pub type MqttTransport = mqtt::MqttClient;
