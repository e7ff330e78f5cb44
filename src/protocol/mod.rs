//! Wire protocol for the tasking channel: message envelopes and topics.

pub mod messages;
pub mod topics;

pub use messages::{HostFacts, TaskMessage, TaskResult};
pub use topics::{canonicalize_topic, validate_client_id, TopicSet, ValidationError};
