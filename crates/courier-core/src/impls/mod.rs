//! Impls - ports の in-process 実装
//!
//! - **ExponentialBackoffRetryStrategy**: 上限付き指数 backoff の `RetryStrategy`
//! - **SyncTransport**: `send` の中で handler を実行
//! - **QueueTransport**: claim と dead letter を持つ in-memory 優先度キュー

pub mod backoff;
pub mod queue_transport;
pub mod sync_transport;

pub use self::backoff::{ExponentialBackoffRetryStrategy, RetryConfig};
pub use self::queue_transport::{QUEUE_TRANSPORT, QueueTransport};
pub use self::sync_transport::{SYNC_TRANSPORT, SyncTransport};
