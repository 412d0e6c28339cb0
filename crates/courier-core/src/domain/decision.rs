//! Retry decisions: what to do with an envelope whose handler failed.
//!
//! `RetryManager` is a pure function of (envelope, error). It never touches a
//! transport; the worker applies the returned [`RetryDecision`].

use std::sync::Arc;
use std::time::Duration;

use super::envelope::MessageEnvelope;
use super::errors::HandlerError;
use crate::ports::RetryStrategy;

/// Outcome of [`RetryManager::determine_retry_action`]. Recomputed on every
/// failure, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Option<Duration>,
    pub new_retry_count: u32,
    pub should_move_to_dead_letter: bool,
    pub reason: String,
}

impl RetryDecision {
    fn retry(new_retry_count: u32, delay: Duration, reason: String) -> Self {
        Self {
            should_retry: true,
            delay: Some(delay),
            new_retry_count,
            should_move_to_dead_letter: false,
            reason,
        }
    }

    fn dead_letter(retry_count: u32, reason: String) -> Self {
        Self {
            should_retry: false,
            delay: None,
            new_retry_count: retry_count,
            should_move_to_dead_letter: true,
            reason,
        }
    }
}

/// Turns handler failures into retry / dead-letter decisions.
///
/// - non-retryable error: dead-letter immediately, the retry budget is untouched
/// - `retry_count >= max_retries`: dead-letter, budget exhausted
/// - otherwise: retry after `strategy.get_delay(retry_count)`
///
/// The budget comes from the envelope (`metadata.max_retries`, fixed at
/// dispatch time); the strategy only supplies the backoff timing.
#[derive(Clone)]
pub struct RetryManager {
    strategy: Arc<dyn RetryStrategy>,
}

impl RetryManager {
    pub fn new(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &Arc<dyn RetryStrategy> {
        &self.strategy
    }

    pub fn determine_retry_action(
        &self,
        envelope: &MessageEnvelope,
        error: &HandlerError,
    ) -> RetryDecision {
        let retry_count = envelope.retry_count();
        let max_retries = envelope.max_retries();

        if !error.is_retryable() {
            return RetryDecision::dead_letter(
                retry_count,
                format!("non-retryable error: {}", error.message()),
            );
        }

        if retry_count >= max_retries {
            return RetryDecision::dead_letter(
                retry_count,
                format!(
                    "retries exhausted ({retry_count}/{max_retries}): {}",
                    error.message()
                ),
            );
        }

        let delay = self.strategy.get_delay(retry_count, envelope.message_type());
        RetryDecision::retry(
            retry_count + 1,
            delay,
            format!(
                "retry {}/{max_retries} after {delay:?}: {}",
                retry_count + 1,
                error.message()
            ),
        )
    }
}
