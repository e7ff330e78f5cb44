//! MQTT implementation of the transport session
//!
//! Split in the usual way: `connection` holds pure state/option handling,
//! `message_handler` holds pure event routing, `client` owns the I/O and the
//! session supervisor task.

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
pub use message_handler::{route_event, EventRoute, TaskForwarder};
