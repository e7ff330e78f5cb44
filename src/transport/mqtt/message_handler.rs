//! Pure routing and parsing for MQTT events
//!
//! Turns `rumqttc` events into routing decisions for the session supervisor
//! and hands parsed task messages to the dispatch worker. Everything here is
//! non-blocking: it runs on the supervisor's event context.

use crate::protocol::TaskMessage;
use rumqttc::{Event, Packet, QoS, SubscribeReasonCode};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the session; `session_present = false` means prior
    /// subscription state was discarded and must be reissued
    SessionAccepted { session_present: bool },
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Broker granted (or rejected) subscriptions; one entry per topic filter
    SubscriptionResult { granted: Vec<Option<QoS>> },
    /// Broker requested disconnection
    Disconnected,
    /// Protocol plumbing (PingResp etc.)
    Infrastructure,
    /// Outgoing packet, handled by rumqttc
    Outgoing,
}

/// Map a rumqttc event to a routing decision (pure function).
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(connack) => EventRoute::SessionAccepted {
                session_present: connack.session_present,
            },
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            },
            Packet::SubAck(suback) => EventRoute::SubscriptionResult {
                granted: suback.return_codes.iter().map(granted_qos).collect(),
            },
            Packet::Disconnect => EventRoute::Disconnected,
            _ => EventRoute::Infrastructure,
        },
        Event::Outgoing(_) => EventRoute::Outgoing,
    }
}

/// Extract the granted QoS from a SubAck reason code; `None` is a rejection.
pub fn granted_qos(code: &SubscribeReasonCode) -> Option<QoS> {
    match code {
        SubscribeReasonCode::Success(qos) => Some(*qos),
        SubscribeReasonCode::Failure => None,
    }
}

/// Whether an inbound publish belongs to the tasking path (pure function).
/// Retained messages are ignored so stale tasking is never replayed.
pub fn should_process(topic: &str, retain: bool, tasking_topic: &str) -> bool {
    if retain {
        debug!(topic, "Ignoring retained message");
        return false;
    }
    if topic != tasking_topic {
        debug!(topic, expected = tasking_topic, "Ignoring message on unexpected topic");
        return false;
    }
    true
}

/// Strictly decode an inbound payload; both fields are required.
pub fn parse_task_message(payload: &[u8]) -> Result<TaskMessage, String> {
    serde_json::from_slice::<TaskMessage>(payload)
        .map_err(|e| format!("malformed task message: {e}"))
}

/// Hand-off of parsed task messages to the dispatch worker.
///
/// Uses `try_send` so a slow worker can never stall the supervisor; with
/// at-least-once delivery the operator can reissue a dropped task.
#[derive(Debug, Default)]
pub struct TaskForwarder {
    sender: Option<mpsc::Sender<TaskMessage>>,
}

impl TaskForwarder {
    pub fn new() -> Self {
        Self { sender: None }
    }

    pub fn set_sender(&mut self, sender: mpsc::Sender<TaskMessage>) {
        self.sender = Some(sender);
    }

    pub fn forward(&self, message: TaskMessage) {
        let Some(sender) = &self.sender else {
            warn!("Task received before worker was attached - dropped");
            return;
        };

        if let Err(e) = sender.try_send(message) {
            warn!(error = %e, "Task worker queue unavailable - task dropped");
        }
    }
}
