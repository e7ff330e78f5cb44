//! Wire message types for the tasking channel
//!
//! Two envelopes cross the wire: inbound [`TaskMessage`] on the tasking topic
//! and outbound [`TaskResult`] on the results and heartbeat topics. Existing
//! consumers expect `success` as the literal strings `"true"`/`"false"`, so
//! that encoding is preserved even though the field is a real `bool` here.

use serde::{Deserialize, Serialize};

/// Inbound task description.
///
/// Both fields are required; a payload missing either does not decode and is
/// treated as malformed input by the message-handling path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    /// Task name, e.g. `ping` or `set-dwell-time`
    pub task: String,
    /// Task-specific argument string (may be empty)
    pub arguments: String,
}

/// Outbound result envelope, published verbatim and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    /// Task output or a human-readable error description
    pub contents: String,
    /// Wire-encoded as the strings "true"/"false"
    #[serde(with = "string_bool")]
    pub success: bool,
}

impl TaskResult {
    pub fn ok(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            success: true,
        }
    }

    pub fn failure(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            success: false,
        }
    }

    /// The fixed liveness envelope sent by the beacon loop.
    pub fn heartbeat() -> Self {
        Self::ok("heartbeat")
    }
}

/// Host facts reported by the `host-recon` task, JSON-encoded into
/// `TaskResult::contents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostFacts {
    pub os_info: String,
    pub host_info: String,
}

/// Serialize `bool` as `"true"`/`"false"` and accept either encoding on
/// input, for compatibility with deployed consumers of the results topic.
mod string_bool {
    use serde::de::{Deserializer, Error, Unexpected};
    use serde::ser::Serializer;
    use serde::Deserialize;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Flag(bool),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(flag) => Ok(flag),
            Repr::Text(text) => match text.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(Error::invalid_value(
                    Unexpected::Str(other),
                    &"\"true\" or \"false\"",
                )),
            },
        }
    }
}
