//! HandlerExecutor - envelope 1 件分の handler 実行
//!
//! # 学習ポイント
//! - `FutureExt::catch_unwind` による panic の捕捉
//! - `tokio::time::timeout` による実行時間の上限
//! - 失敗を `Err` ではなく値（ExecutionResult）で返す

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, warn};

use super::registry::{HandlerContext, HandlerRegistry};
use crate::domain::{HandlerError, MessageEnvelope};

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Upper bound for one handler invocation. A timed-out attempt is retryable.
    pub handler_timeout: Option<Duration>,
}

/// Outcome of a single execution. Never an `Err`: the caller decides what a
/// failure means for the envelope.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub error: Option<HandlerError>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct HandlerExecutor {
    registry: Arc<HandlerRegistry>,
    config: ExecutorConfig,
}

impl HandlerExecutor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::with_config(registry, ExecutorConfig::default())
    }

    pub fn with_config(registry: Arc<HandlerRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Execute one envelope.
    ///
    /// - no handler for the type: permanent failure, so the envelope is
    ///   dead-lettered instead of silently dropped
    /// - handler panic: caught and reported as a permanent failure
    /// - timeout: retryable failure
    pub async fn execute(&self, envelope: &MessageEnvelope) -> ExecutionResult {
        let started = Instant::now();
        let message_type = envelope.message_type();

        let Some(handler) = self.registry.get(message_type) else {
            warn!(
                message_id = %envelope.id,
                message_type = %message_type,
                "no handler registered"
            );
            return ExecutionResult {
                error: Some(HandlerError::permanent(format!(
                    "no handler registered for message type '{message_type}'"
                ))),
                elapsed: started.elapsed(),
            };
        };

        let context = HandlerContext::new(envelope);
        let run = AssertUnwindSafe(handler.handle(&envelope.message, envelope, &context))
            .catch_unwind();

        let outcome = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Ok(Err(HandlerError::retryable(format!(
                    "handler timed out after {}ms",
                    limit.as_millis()
                )))),
            },
            None => run.await,
        };

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(HandlerError::permanent(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let elapsed = started.elapsed();
        debug!(
            message_id = %envelope.id,
            message_type = %message_type,
            elapsed_ms = elapsed.as_millis() as u64,
            success = error.is_none(),
            "handler finished"
        );

        ExecutionResult { error, elapsed }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
