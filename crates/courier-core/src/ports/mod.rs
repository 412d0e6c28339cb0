//! Ports - エンジンとバックエンドの境界
//!
//! envelope の置き場所、時刻の読み方、ID の発行、backoff の形をそれぞれ
//! trait の裏に隠し、app 層を in-memory 実装でテストできるようにする。

pub mod clock;
pub mod id_generator;
pub mod retry_strategy;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::retry_strategy::RetryStrategy;
pub use self::transport::{DEFAULT_MAX_RETRIES, Rejection, Transport};
