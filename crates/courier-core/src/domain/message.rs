//! Message model: the immutable data carried end-to-end.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::CourierError;

/// A message: type + payload (+ metadata).
///
/// Fields are private so a message cannot be mutated once it has been built.
/// `with_metadata` consumes the message and returns a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    message_type: String,
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl Message {
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// A message is dispatchable only if it names a (non-blank) type.
    pub fn validate(&self) -> Result<(), CourierError> {
        if self.message_type.trim().is_empty() {
            return Err(CourierError::MessageValidation(
                "message type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Delivery priority, `1` (lowest) to `10` (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub const LOW: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGH: Priority = Priority(8);
    pub const CRITICAL: Priority = Priority(10);

    pub fn new(value: u8) -> Result<Self, CourierError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CourierError::Configuration(format!(
                "priority must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl TryFrom<u8> for Priority {
    type Error = CourierError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use rstest::rstest;

    #[test]
    fn empty_type_fails_validation() {
        let err = Message::new("", serde_json::json!({})).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = Message::new("   ", serde_json::json!({})).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn metadata_is_attached_by_value() {
        let original = Message::new("campaign.send", serde_json::json!({"id": 7}));
        let tagged = original.clone().with_metadata("tenant", serde_json::json!("acme"));

        assert!(original.metadata().is_empty());
        assert_eq!(tagged.metadata()["tenant"], "acme");
        assert_eq!(tagged.payload()["id"], 7);
    }

    #[rstest]
    #[case::min(1)]
    #[case::normal(5)]
    #[case::max(10)]
    fn priorities_in_range_are_accepted(#[case] value: u8) {
        assert_eq!(Priority::new(value).unwrap().value(), value);
    }

    #[rstest]
    #[case::zero(0)]
    #[case::eleven(11)]
    #[case::max_u8(255)]
    fn priorities_out_of_range_are_configuration_errors(#[case] value: u8) {
        let err = Priority::new(value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn priority_defaults_to_normal() {
        assert_eq!(Priority::default(), Priority::NORMAL);
        assert!(Priority::HIGH > Priority::NORMAL);
        assert!(Priority::NORMAL > Priority::LOW);
    }
}
