//! RetryStrategy port - backoff 時間と retry 回数の上限
//!
//! strategy は純粋関数として振る舞う。retry 回数（と message type）から
//! 待ち時間と次の試行の可否を答えるだけで、適用するのは worker の役目。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::HandlerError;

pub trait RetryStrategy: Send + Sync {
    /// Delay to wait before the attempt following `retry_count` failures.
    fn get_delay(&self, retry_count: u32, message_type: &str) -> Duration;

    /// Whether the retry budget allows another attempt.
    fn should_retry(&self, retry_count: u32, message_type: &str) -> bool;

    fn is_retryable(&self, error: &HandlerError, retry_count: u32, message_type: &str) -> bool {
        error.is_retryable() && self.should_retry(retry_count, message_type)
    }

    fn get_next_available_time(
        &self,
        retry_count: u32,
        message_type: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = self.get_delay(retry_count, message_type);
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
