//! IdGenerator port - ID とトークンの生成
//!
//! # 実装
//! - **UlidGenerator**: `Clock` のタイムスタンプを使う ULID、ランダムな idempotency key

use rand::Rng;
use rand::distributions::Alphanumeric;
use ulid::Ulid;

use crate::domain::{MessageId, ScheduleId};
use crate::ports::Clock;

const IDEMPOTENCY_KEY_LEN: usize = 32;

/// Generates ids that can be created on any node without coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;

    fn generate_schedule_id(&self) -> ScheduleId;

    /// Opaque random token used when the caller supplies no idempotency key.
    fn generate_idempotency_key(&self) -> String;
}

/// ULID generator.
///
/// The timestamp half of each ULID comes from the clock, so a `FixedClock`
/// yields ids with a deterministic time prefix.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }

    fn generate_schedule_id(&self) -> ScheduleId {
        ScheduleId::from(self.next_ulid())
    }

    fn generate_idempotency_key(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(IDEMPOTENCY_KEY_LEN)
            .map(char::from)
            .collect()
    }
}
