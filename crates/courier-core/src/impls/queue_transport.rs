//! QueueTransport - in-memory のキュー配送
//!
//! # 学習ポイント
//! - `BTreeMap` の複合キーによる優先度順序
//! - `tokio::sync::Mutex` 1 つで全状態を守る（handler 実行中はロックを持たない）
//! - idempotency key による重複排除
//!
//! # 実装詳細
//! - `pending`: (priority 降順, available_at 昇順, 挿入順) で並ぶ
//! - `claimed`: `receive` で渡した envelope（id がキー）
//! - `dead`: dead letter（`<queue>.dead` がキー）

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{MessageEnvelope, MessageId, Priority, TransportError};
use crate::ports::{Clock, DEFAULT_MAX_RETRIES, Rejection, SharedClock, Transport};

pub const QUEUE_TRANSPORT: &str = "queue";

/// Delivery order key.
type OrderKey = (Reverse<Priority>, DateTime<Utc>, u64);

#[derive(Default)]
struct QueueState {
    pending: BTreeMap<OrderKey, MessageEnvelope>,
    claimed: HashMap<MessageId, MessageEnvelope>,
    dead: HashMap<String, Vec<MessageEnvelope>>,
    /// Idempotency keys of pending or claimed envelopes.
    in_flight_keys: HashSet<String>,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, envelope: MessageEnvelope) {
        let key = (Reverse(envelope.priority), envelope.available_at, self.next_seq);
        self.next_seq += 1;
        self.pending.insert(key, envelope);
    }

    fn release_key(&mut self, envelope: &MessageEnvelope) {
        if let Some(key) = envelope.idempotency_key() {
            self.in_flight_keys.remove(key);
        }
    }
}

/// QueueTransport は in-memory の優先度キュー
pub struct QueueTransport {
    name: String,
    clock: SharedClock,
    max_retries: u32,
    deduplicate: bool,
    state: Arc<Mutex<QueueState>>,
}

impl QueueTransport {
    pub fn new(clock: SharedClock) -> Self {
        Self::named(QUEUE_TRANSPORT, clock)
    }

    pub fn named(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            clock,
            max_retries: DEFAULT_MAX_RETRIES,
            deduplicate: true,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Retry budget for envelopes dispatched without an explicit `max_retries`.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Drop sends whose idempotency key is already pending or claimed (on by default).
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    /// Snapshot of the dead-lettered envelopes of `queue_name`.
    pub async fn dead_letters(&self, queue_name: &str) -> Vec<MessageEnvelope> {
        let state = self.state.lock().await;
        state
            .dead
            .get(&MessageEnvelope::dead_letter_queue(queue_name))
            .cloned()
            .unwrap_or_default()
    }

    /// Move every dead-lettered envelope of `queue_name` back to the live
    /// queue with a fresh retry budget. Returns how many were moved.
    ///
    /// With deduplication on, an envelope whose idempotency key was sent
    /// again after it died stays dead-lettered.
    pub async fn redrive(&self, queue_name: &str) -> usize {
        let now = self.clock.now();
        let dead_queue = MessageEnvelope::dead_letter_queue(queue_name);
        let mut state = self.state.lock().await;
        let Some(dead) = state.dead.remove(&dead_queue) else {
            return 0;
        };

        let mut moved = 0;
        let mut kept = Vec::new();
        for mut envelope in dead {
            if let Some(key) = envelope.metadata.idempotency_key.clone() {
                if self.deduplicate && !state.in_flight_keys.insert(key) {
                    kept.push(envelope);
                    continue;
                }
            }
            envelope.metadata.retry_count = 0;
            envelope.available_at = now;
            state.push(envelope);
            moved += 1;
        }

        if !kept.is_empty() {
            debug!(
                transport = %self.name,
                queue = %queue_name,
                kept = kept.len(),
                "dead letters with a live idempotency key left in place"
            );
            state.dead.insert(dead_queue, kept);
        }
        debug!(transport = %self.name, queue = %queue_name, moved, "redrove dead letters");
        moved
    }
}

#[async_trait]
impl Transport for QueueTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, envelope: MessageEnvelope) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        if let Some(key) = envelope.idempotency_key() {
            if self.deduplicate && state.in_flight_keys.contains(key) {
                debug!(
                    message_id = %envelope.id,
                    idempotency_key = %key,
                    "duplicate send dropped"
                );
                return Ok(());
            }
            state.in_flight_keys.insert(key.to_string());
        }

        debug!(
            message_id = %envelope.id,
            message_type = %envelope.message_type(),
            queue = %envelope.queue_name,
            priority = %envelope.priority,
            "enqueued"
        );
        state.push(envelope);
        Ok(())
    }

    async fn receive(&self, batch_size: usize) -> Result<Vec<MessageEnvelope>, TransportError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let keys: Vec<OrderKey> = state
            .pending
            .iter()
            .filter(|(_, envelope)| envelope.is_available(now))
            .take(batch_size)
            .map(|(key, _)| *key)
            .collect();

        let mut batch = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(envelope) = state.pending.remove(&key) {
                state.claimed.insert(envelope.id, envelope.clone());
                batch.push(envelope);
            }
        }
        Ok(batch)
    }

    async fn acknowledge(&self, envelope: &MessageEnvelope) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let claimed = state
            .claimed
            .remove(&envelope.id)
            .ok_or(TransportError::NotClaimed(envelope.id))?;
        state.release_key(&claimed);

        debug!(message_id = %envelope.id, queue = %envelope.queue_name, "acknowledged");
        Ok(())
    }

    async fn reject(
        &self,
        envelope: &MessageEnvelope,
        rejection: Rejection,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let claimed = state
            .claimed
            .remove(&envelope.id)
            .ok_or(TransportError::NotClaimed(envelope.id))?;

        match rejection {
            Rejection::Retry {
                retry_count,
                available_at,
                error,
            } => {
                state.push(claimed.for_retry(retry_count, available_at, error));
            }
            Rejection::DeadLetter { reason } => {
                state.release_key(&claimed);
                let mut dead = claimed;
                dead.metadata.last_error = Some(reason);
                state
                    .dead
                    .entry(MessageEnvelope::dead_letter_queue(&dead.queue_name))
                    .or_default()
                    .push(dead);
            }
        }
        Ok(())
    }

    async fn queue_depth(&self, queue_name: Option<&str>) -> Result<usize, TransportError> {
        let state = self.state.lock().await;
        let depth = match queue_name {
            None => state.pending.len(),
            Some(name) => match state.dead.get(name) {
                Some(dead) => dead.len(),
                None => state
                    .pending
                    .values()
                    .filter(|envelope| envelope.queue_name == name)
                    .count(),
            },
        };
        Ok(depth)
    }

    fn default_max_retries(&self) -> u32 {
        self.max_retries
    }
}
