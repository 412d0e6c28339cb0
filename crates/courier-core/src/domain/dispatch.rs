//! Dispatch options and results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::message::Priority;

/// Every option `Dispatcher::dispatch` recognizes.
///
/// Unset fields fall back to the dispatcher's configuration:
/// - `transport`: default transport name
/// - `queue`: default queue name
/// - `priority`: `Priority::NORMAL`; validated to be in `1..=10`
/// - `scheduled_at`: now
/// - `idempotency_key`: a generated random token
/// - `max_retries`: the transport's default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    pub transport: Option<String>,
    pub queue: Option<String>,
    /// Raw value; validated at dispatch time.
    pub priority: Option<u8>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub max_retries: Option<u32>,
    pub headers: BTreeMap<String, String>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, name: impl Into<String>) -> Self {
        self.transport = Some(name.into());
        self
    }

    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.queue = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Returned synchronously by `dispatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub message_id: MessageId,
    pub transport: String,
    pub queue: String,
    pub priority: Priority,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
}
