//! Transport port - envelope の保存・順序付け・配送
//!
//! # 実装が守るべき性質
//! - `receive` は排他的: 並行呼び出しが同じ envelope を返すことはない
//! - 返した envelope は acknowledge / reject されるまで再度返さない
//! - claim されていない envelope への `acknowledge` / `reject` は
//!   `TransportError::NotClaimed`（claim しない transport では無視）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{MessageEnvelope, TransportError};

/// Default retry budget for envelopes dispatched without `max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What `reject` should do with a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Re-enqueue for another attempt.
    Retry {
        retry_count: u32,
        available_at: DateTime<Utc>,
        error: String,
    },
    /// Move to the queue's dead-letter destination.
    DeadLetter { reason: String },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Name the dispatcher resolves `DispatchOptions::transport` against.
    fn name(&self) -> &str;

    async fn send(&self, envelope: MessageEnvelope) -> Result<(), TransportError>;

    /// Claim up to `batch_size` envelopes that are available now.
    async fn receive(&self, batch_size: usize) -> Result<Vec<MessageEnvelope>, TransportError>;

    /// Permanently remove a claimed envelope.
    async fn acknowledge(&self, envelope: &MessageEnvelope) -> Result<(), TransportError>;

    async fn reject(
        &self,
        envelope: &MessageEnvelope,
        rejection: Rejection,
    ) -> Result<(), TransportError>;

    /// Pending envelopes in `queue_name` (all live queues when `None`).
    /// Dead-letter destinations are addressed by their own name, e.g. `emails.dead`.
    async fn queue_depth(&self, queue_name: Option<&str>) -> Result<usize, TransportError>;

    fn default_max_retries(&self) -> u32 {
        DEFAULT_MAX_RETRIES
    }

    /// Whether envelopes can be held until `available_at`. Transports that
    /// deliver during `send` return `false`.
    fn supports_delayed_delivery(&self) -> bool {
        true
    }
}
