//! MessageEnvelope - the unit moved through transports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::message::{Message, Priority};

/// Delivery bookkeeping carried with an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Error of the most recent failed attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A message plus everything a transport needs to store, order and deliver it.
///
/// Invariant: not eligible for delivery while `available_at > now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: MessageId,
    pub message: Message,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub transport_name: String,
    pub queue_name: String,
    pub priority: Priority,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub metadata: EnvelopeMetadata,
}

impl MessageEnvelope {
    pub fn message_type(&self) -> &str {
        self.message.message_type()
    }

    pub fn retry_count(&self) -> u32 {
        self.metadata.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.metadata.max_retries
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata.idempotency_key.as_deref()
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.available_at <= now
    }

    /// Copy of this envelope prepared for another delivery attempt.
    pub fn for_retry(
        &self,
        retry_count: u32,
        available_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        let mut next = self.clone();
        next.metadata.retry_count = retry_count;
        next.metadata.last_error = Some(error.into());
        next.available_at = available_at;
        next
    }

    /// Name of the dead-letter destination for `queue_name`.
    pub fn dead_letter_queue(queue_name: &str) -> String {
        format!("{queue_name}.dead")
    }
}
