//! Mock transport for exercising the agent core without a broker

use crate::protocol::{TaskMessage, TaskResult};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory transport that records every publish and lets tests inject
/// inbound tasks through the captured sender.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<ConnectionState>>,
    results: Arc<Mutex<Vec<TaskResult>>>,
    heartbeats: Arc<Mutex<u64>>,
    subscribed: Arc<Mutex<Vec<String>>>,
    task_sender: Arc<Mutex<Option<mpsc::Sender<TaskMessage>>>>,
    fail_publish: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected(
                "never connected".to_string(),
            ))),
            results: Arc::new(Mutex::new(Vec::new())),
            heartbeats: Arc::new(Mutex::new(0)),
            subscribed: Arc::new(Mutex::new(Vec::new())),
            task_sender: Arc::new(Mutex::new(None)),
            fail_publish: Arc::new(Mutex::new(false)),
        }
    }

    /// Everything published to the results topic so far.
    pub fn published_results(&self) -> Vec<TaskResult> {
        lock(&self.results).clone()
    }

    pub fn heartbeat_count(&self) -> u64 {
        *lock(&self.heartbeats)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        lock(&self.subscribed).clone()
    }

    /// Deliver an inbound task as if it arrived on the tasking topic.
    /// Panics if no worker has been attached yet.
    pub async fn inject_task(&self, message: TaskMessage) {
        let sender = lock(&self.task_sender)
            .clone()
            .expect("no task sender attached");
        sender.send(message).await.expect("task queue closed");
    }

    pub fn set_permanently_disconnected(&self, reason: &str) {
        *lock(&self.state) = ConnectionState::PermanentlyDisconnected(reason.to_string());
    }

    /// Make subsequent publishes fail with a NotConnected error.
    pub fn fail_publishes(&self, fail: bool) {
        *lock(&self.fail_publish) = fail;
    }

    fn check_publish(&self) -> Result<(), MqttError> {
        if *lock(&self.fail_publish) {
            return Err(MqttError::NotConnected {
                state: lock(&self.state).clone(),
            });
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        *lock(&self.state) = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        *lock(&self.state) = ConnectionState::Disconnected("client disconnect".to_string());
        Ok(())
    }

    async fn subscribe_to_tasking(&self) -> Result<(), Self::Error> {
        lock(&self.subscribed).push("c2/tasking".to_string());
        Ok(())
    }

    async fn publish_result(&self, result: &TaskResult) -> Result<(), Self::Error> {
        self.check_publish()?;
        lock(&self.results).push(result.clone());
        Ok(())
    }

    async fn publish_heartbeat(&self) -> Result<(), Self::Error> {
        self.check_publish()?;
        *lock(&self.heartbeats) += 1;
        Ok(())
    }

    fn set_task_sender(&self, sender: mpsc::Sender<TaskMessage>) {
        *lock(&self.task_sender) = Some(sender);
    }

    fn connection_state(&self) -> ConnectionState {
        lock(&self.state).clone()
    }

    fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            ConnectionState::PermanentlyDisconnected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_publishes() {
        let mut transport = MockTransport::new();
        transport.connect().await.unwrap();
        transport.subscribe_to_tasking().await.unwrap();

        transport.publish_result(&TaskResult::ok("pong")).await.unwrap();
        transport.publish_heartbeat().await.unwrap();

        assert_eq!(transport.published_results(), vec![TaskResult::ok("pong")]);
        assert_eq!(transport.heartbeat_count(), 1);
        assert_eq!(transport.subscribed_topics(), vec!["c2/tasking"]);
    }

    #[tokio::test]
    async fn test_mock_publish_failures() {
        let transport = MockTransport::new();
        transport.fail_publishes(true);
        assert!(transport.publish_heartbeat().await.is_err());

        transport.fail_publishes(false);
        assert!(transport.publish_heartbeat().await.is_ok());
    }
}
