//! MQTT session client and supervisor
//!
//! `MqttClient` owns the rumqttc handles and a background supervisor task
//! that polls the event loop, tracks connection state through a watch
//! channel, retries interruptions with backoff, and reissues subscriptions
//! when the broker comes back without the previous session. Recovery actions
//! run as non-blocking continuations on the supervisor context; only
//! `connect` and `disconnect` wait synchronously, by design.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::message_handler::{self, EventRoute, TaskForwarder};
use crate::config::AgentConfig;
use crate::protocol::{TaskMessage, TaskResult, TopicSet};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `connect` waits for the broker's ConnAck.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// MQTT transport session for the tasking channel.
pub struct MqttClient {
    client_id: String,
    topics: TopicSet,
    client: AsyncClient,
    event_loop: StdMutex<Option<EventLoop>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    pending_subacks: Arc<Mutex<VecDeque<String>>>,
    forwarder: Arc<RwLock<TaskForwarder>>,
    supervisor_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    pub fn new(config: &AgentConfig) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(&config.agent.client_id, &config.mqtt)?;
        let topics = config
            .topics()
            .map_err(|e| MqttError::ConnectionFailed(e.to_string()))?;

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        let (state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected("never connected".to_string()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            client_id: config.agent.client_id.clone(),
            topics,
            client,
            event_loop: StdMutex::new(Some(event_loop)),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            reconnect: ReconnectConfig::default(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            pending_subacks: Arc::new(Mutex::new(VecDeque::new())),
            forwarder: Arc::new(RwLock::new(TaskForwarder::new())),
            supervisor_handle: StdMutex::new(None),
        })
    }

    /// Wait until the watch channel reports Connected, or fail on a terminal
    /// state or timeout.
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match state_rx.borrow_and_update().clone() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason)
                    | ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    ConnectionState::Connecting | ConnectionState::Interrupted(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "state channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(
                "timed out waiting for broker ConnAck".to_string(),
            )),
        }
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self.state_rx.borrow().clone();
        if !state.can_publish() {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    async fn publish_envelope(&self, topic: &str, envelope: &TaskResult) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let payload = serde_json::to_vec(envelope).map_err(MqttError::Serialization)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic, "Published envelope");
        Ok(())
    }

    fn take_supervisor_handle(&self) -> Option<JoinHandle<()>> {
        self.supervisor_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let event_loop = self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| MqttError::ConnectionFailed("already connected".to_string()))?;

        let _ = self.state_tx.send(ConnectionState::Connecting);
        info!(
            client_id = %self.client_id,
            tasking_topic = %self.topics.tasking,
            "Connecting to broker"
        );

        let supervisor = SessionSupervisor {
            client: self.client.clone(),
            client_id: self.client_id.clone(),
            tasking_topic: self.topics.tasking.clone(),
            state_tx: self.state_tx.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            reconnect: self.reconnect.clone(),
            subscriptions: self.subscriptions.clone(),
            pending_subacks: self.pending_subacks.clone(),
            forwarder: self.forwarder.clone(),
        };
        let handle = tokio::spawn(supervisor.run(event_loop));
        *self
            .supervisor_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        let confirmation =
            Self::wait_for_connection_confirmation(self.state_rx.clone(), CONNECT_TIMEOUT).await;

        if confirmation.is_err() {
            // Startup failures are fatal; stop the supervisor's retries.
            let _ = self.shutdown_tx.send(true);
        }
        confirmation
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request not delivered (session already gone)");
        }
        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected("client disconnect".to_string()));

        if let Some(handle) = self.take_supervisor_handle() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Session supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Session supervisor ended with error")
                }
                Err(_) => warn!("Session supervisor did not stop in time, aborting"),
                _ => {}
            }
        }

        info!(client_id = %self.client_id, "Disconnected");
        Ok(())
    }

    async fn subscribe_to_tasking(&self) -> Result<(), Self::Error> {
        let state = self.state_rx.borrow().clone();
        if !state.can_subscribe() {
            return Err(MqttError::NotConnected { state });
        }

        let topic = self.topics.tasking.clone();
        {
            let mut subscriptions = self.subscriptions.lock().await;
            if !subscriptions.iter().any(|(t, _)| t == &topic) {
                subscriptions.push((topic.clone(), QoS::AtLeastOnce));
            }
        }

        self.pending_subacks.lock().await.push_back(topic.clone());
        if let Err(e) = self.client.subscribe(&topic, QoS::AtLeastOnce).await {
            self.pending_subacks.lock().await.pop_back();
            return Err(MqttError::SubscribeFailed(Box::new(e)));
        }

        info!(topic, "Subscribed to tasking topic");
        Ok(())
    }

    async fn publish_result(&self, result: &TaskResult) -> Result<(), Self::Error> {
        let topic = self.topics.results.clone();
        self.publish_envelope(&topic, result).await
    }

    async fn publish_heartbeat(&self) -> Result<(), Self::Error> {
        let topic = self.topics.heartbeat.clone();
        self.publish_envelope(&topic, &TaskResult::heartbeat()).await
    }

    fn set_task_sender(&self, sender: mpsc::Sender<TaskMessage>) {
        self.forwarder
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_sender(sender);
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            ConnectionState::PermanentlyDisconnected(_)
        )
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self
            .supervisor_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Background task that drives the rumqttc event loop and sequences the
/// interrupted -> resumed -> resubscribe-validated recovery stages.
struct SessionSupervisor {
    client: AsyncClient,
    client_id: String,
    tasking_topic: String,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    pending_subacks: Arc<Mutex<VecDeque<String>>>,
    forwarder: Arc<RwLock<TaskForwarder>>,
}

impl SessionSupervisor {
    async fn run(self, mut event_loop: EventLoop) {
        info!(client_id = %self.client_id, "Session supervisor started");
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping session supervisor");
                        break;
                    }
                }
                polled = event_loop.poll() => {
                    let keep_going = match polled {
                        Ok(event) => {
                            self.handle_route(
                                message_handler::route_event(&event),
                                &mut reconnect_attempts,
                            )
                            .await
                        }
                        Err(e) => self.handle_interruption(e, &mut reconnect_attempts).await,
                    };
                    if !keep_going {
                        break;
                    }
                }
            }
        }

        info!(client_id = %self.client_id, "Session supervisor stopped");
    }

    /// React to a routed event. Returns false to stop the supervisor.
    async fn handle_route(&self, route: EventRoute, reconnect_attempts: &mut u32) -> bool {
        match route {
            EventRoute::SessionAccepted { session_present } => {
                *reconnect_attempts = 0;
                let _ = self.state_tx.send(ConnectionState::Connected);
                info!(session_present, "Broker accepted session");
                if !session_present {
                    // The broker discarded prior subscription state.
                    return self.resubscribe_all().await;
                }
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                self.handle_message(&topic, &payload, retain);
                true
            }
            EventRoute::SubscriptionResult { granted } => {
                self.validate_subscription_grants(&granted).await
            }
            EventRoute::Disconnected => {
                warn!("Broker requested disconnect");
                let _ = self
                    .state_tx
                    .send(ConnectionState::Interrupted("server disconnect".to_string()));
                true
            }
            EventRoute::Infrastructure | EventRoute::Outgoing => true,
        }
    }

    /// Reissue every tracked subscription after session loss. Runs on the
    /// supervisor context, so only the non-blocking subscribe path is used;
    /// grants arrive later as SubAck events.
    async fn resubscribe_all(&self) -> bool {
        let subscriptions = self.subscriptions.lock().await.clone();
        if subscriptions.is_empty() {
            return true;
        }

        info!(
            count = subscriptions.len(),
            "Session did not persist, reissuing subscriptions"
        );
        for (topic, qos) in subscriptions {
            self.pending_subacks.lock().await.push_back(topic.clone());
            if let Err(e) = self.client.try_subscribe(&topic, qos) {
                error!(topic, error = %e, "Failed to reissue subscription");
                let _ = self.state_tx.send(ConnectionState::PermanentlyDisconnected(
                    format!("failed to reissue subscription for {topic}: {e}"),
                ));
                return false;
            }
        }
        true
    }

    /// Match a SubAck against the oldest pending subscription and verify the
    /// broker granted a QoS. Operating with a silently rejected tasking
    /// subscription is unsafe, so a rejection is terminal.
    async fn validate_subscription_grants(&self, granted: &[Option<QoS>]) -> bool {
        let Some(topic) = self.pending_subacks.lock().await.pop_front() else {
            debug!("SubAck with no pending subscription");
            return true;
        };

        if granted.iter().any(Option::is_none) {
            error!(topic, "Server rejected subscription");
            let _ = self.state_tx.send(ConnectionState::PermanentlyDisconnected(
                format!("Server rejected subscription to topic: {topic}"),
            ));
            return false;
        }

        debug!(topic, ?granted, "Subscription granted");
        true
    }

    fn handle_message(&self, topic: &str, payload: &[u8], retain: bool) {
        if !message_handler::should_process(topic, retain, &self.tasking_topic) {
            return;
        }

        match message_handler::parse_task_message(payload) {
            Ok(message) => {
                debug!(task = %message.task, "Task message received");
                self.forwarder
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .forward(message);
            }
            Err(e) => {
                // Malformed tasking is dropped; nothing is published back.
                warn!(topic, error = %e, "Dropping malformed task message");
            }
        }
    }

    /// Handle a poll error: report the interruption and back off before the
    /// next poll retries the connection. Returns false once retries are
    /// exhausted or shutdown was requested mid-sleep.
    async fn handle_interruption(&self, error: ConnectionError, attempts: &mut u32) -> bool {
        *attempts += 1;
        let _ = self
            .state_tx
            .send(ConnectionState::Interrupted(error.to_string()));
        warn!(error = %error, attempt = *attempts, "Connection interrupted");

        if let Some(max) = self.reconnect.max_attempts {
            if *attempts > max {
                let reason = format!("max reconnection attempts ({max}) exceeded");
                error!(%reason, "Giving up on broker session");
                let _ = self
                    .state_tx
                    .send(ConnectionState::PermanentlyDisconnected(reason));
                return false;
            }
        }

        let delay_ms = self.reconnect.backoff_delay(*attempts);
        debug!(delay_ms, "Backing off before reconnect");
        Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await
    }

    /// Sleep that aborts early on the shutdown signal. Returns false when
    /// shutdown was requested.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}
