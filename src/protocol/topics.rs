//! Topic canonicalization and construction for the tasking channel
//!
//! Topics are plain relative MQTT topics (no leading slash). The prefix is
//! configurable; the three channel suffixes are fixed.

use thiserror::Error;

/// Suffix for the inbound tasking topic.
pub const TASKING_SUFFIX: &str = "tasking";
/// Suffix for the outbound results topic.
pub const RESULTS_SUFFIX: &str = "results";
/// Suffix for the outbound heartbeat topic.
pub const HEARTBEAT_SUFFIX: &str = "heartbeat";

/// Canonicalize a topic or topic prefix: collapse repeated slashes and strip
/// leading/trailing ones, so `//c2/` and `c2` build the same topics.
pub fn canonicalize_topic(topic: &str) -> String {
    let mut result = topic.to_string();

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    while result.starts_with('/') {
        result.remove(0);
    }
    while result.ends_with('/') {
        result.pop();
    }

    result
}

/// Validate a client identifier (must match `[a-zA-Z0-9._-]+`).
pub fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    if client_id.is_empty() {
        return Err(ValidationError::EmptyClientId);
    }

    for ch in client_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for identifiers and topics
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
    #[error("Topic prefix cannot be empty")]
    EmptyTopicPrefix,
}

/// The three topics the agent keeps active, built from one prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSet {
    pub tasking: String,
    pub results: String,
    pub heartbeat: String,
}

impl TopicSet {
    /// Build the topic set from a prefix (canonicalized first).
    pub fn new(prefix: &str) -> Result<Self, ValidationError> {
        let prefix = canonicalize_topic(prefix);
        if prefix.is_empty() {
            return Err(ValidationError::EmptyTopicPrefix);
        }

        Ok(Self {
            tasking: format!("{prefix}/{TASKING_SUFFIX}"),
            results: format!("{prefix}/{RESULTS_SUFFIX}"),
            heartbeat: format!("{prefix}/{HEARTBEAT_SUFFIX}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn canonicalize_topic_is_idempotent(topic in ".*") {
            let first = canonicalize_topic(&topic);
            let second = canonicalize_topic(&first);
            prop_assert_eq!(first, second, "canonicalize_topic should be idempotent");
        }

        #[test]
        fn canonicalize_topic_has_no_edge_slashes(topic in ".*") {
            let result = canonicalize_topic(&topic);
            prop_assert!(!result.starts_with('/'), "no leading slash: {}", result);
            prop_assert!(!result.ends_with('/'), "no trailing slash: {}", result);
            prop_assert!(!result.contains("//"), "no empty segments: {}", result);
        }
    }

    #[test]
    fn test_canonicalize_examples() {
        assert_eq!(canonicalize_topic("c2"), "c2");
        assert_eq!(canonicalize_topic("/c2/"), "c2");
        assert_eq!(canonicalize_topic("ops//agents"), "ops/agents");
        assert_eq!(canonicalize_topic("///"), "");
    }

    #[test]
    fn test_topic_set_default_prefix() {
        let topics = TopicSet::new("c2").unwrap();
        assert_eq!(topics.tasking, "c2/tasking");
        assert_eq!(topics.results, "c2/results");
        assert_eq!(topics.heartbeat, "c2/heartbeat");
    }

    #[test]
    fn test_topic_set_rejects_empty_prefix() {
        assert_eq!(TopicSet::new("//"), Err(ValidationError::EmptyTopicPrefix));
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("beacon_client-01.test").is_ok());
        assert_eq!(validate_client_id(""), Err(ValidationError::EmptyClientId));
        assert_eq!(
            validate_client_id("bad id"),
            Err(ValidationError::InvalidClientIdChar(' '))
        );
    }
}
