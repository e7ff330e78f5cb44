//! Remote-tasking agent over MQTT
//!
//! Maintains a persistent broker session, receives task descriptions on a
//! tasking topic, executes them through a pluggable handler registry, and
//! publishes results and periodic liveness beacons.
//!
//! Layering, leaves first:
//!
//! - [`protocol`] - wire envelopes and topic derivation
//! - [`state`] - shared dwell interval and running flag
//! - [`tasks`] - task handler registry and built-ins
//! - [`transport`] - broker session behind the [`transport::Transport`] trait
//! - [`agent`] - lifecycle sequencing and the beacon loop

pub mod agent;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod state;
pub mod tasks;
pub mod testing;
pub mod transport;

pub use agent::{AgentLifecycle, LifecycleError};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use state::RuntimeState;
pub use tasks::{TaskDispatcher, TaskHandler};
pub use transport::{MqttTransport, Transport};
