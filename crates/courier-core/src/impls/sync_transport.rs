//! SyncTransport - `send` の中で handler をその場で実行
//!
//! 何も保存しない。`receive` は常に空、`acknowledge` / `reject` は no-op。
//! handler の失敗は `TransportError::Handler` として dispatcher へそのまま返り、
//! retry はしない。未来の `available_at` は保持できないため dispatcher 側で拒否する。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::app::executor::HandlerExecutor;
use crate::domain::{MessageEnvelope, TransportError};
use crate::ports::{Rejection, Transport};

pub const SYNC_TRANSPORT: &str = "sync";

pub struct SyncTransport {
    name: String,
    executor: Arc<HandlerExecutor>,
}

impl SyncTransport {
    pub fn new(executor: Arc<HandlerExecutor>) -> Self {
        Self::named(SYNC_TRANSPORT, executor)
    }

    pub fn named(name: impl Into<String>, executor: Arc<HandlerExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }
}

#[async_trait]
impl Transport for SyncTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, envelope: MessageEnvelope) -> Result<(), TransportError> {
        let result = self.executor.execute(&envelope).await;
        match result.error {
            None => {
                debug!(
                    message_id = %envelope.id,
                    message_type = %envelope.message_type(),
                    "handled synchronously"
                );
                Ok(())
            }
            Some(err) => Err(TransportError::handler(err)),
        }
    }

    async fn receive(&self, _batch_size: usize) -> Result<Vec<MessageEnvelope>, TransportError> {
        Ok(Vec::new())
    }

    async fn acknowledge(&self, _envelope: &MessageEnvelope) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reject(
        &self,
        _envelope: &MessageEnvelope,
        _rejection: Rejection,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn queue_depth(&self, _queue_name: Option<&str>) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn default_max_retries(&self) -> u32 {
        0
    }

    fn supports_delayed_delivery(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use ulid::Ulid;

    use super::*;
    use crate::app::registry::{HandlerContext, HandlerRegistry, MessageHandler};
    use crate::domain::{EnvelopeMetadata, HandlerError, Message, MessageId, Priority};

    struct Counting {
        calls: AtomicUsize,
        fail_with: Option<HandlerError>,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(
            &self,
            _message: &Message,
            _envelope: &MessageEnvelope,
            _context: &HandlerContext<'_>,
        ) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    fn transport(handler: Arc<Counting>) -> SyncTransport {
        let mut registry = HandlerRegistry::new();
        registry.register("report.build", handler).unwrap();
        SyncTransport::new(Arc::new(HandlerExecutor::new(Arc::new(registry))))
    }

    fn envelope() -> MessageEnvelope {
        let now = Utc::now();
        MessageEnvelope {
            id: MessageId::from_ulid(Ulid::new()),
            message: Message::new("report.build", serde_json::json!({})),
            headers: BTreeMap::new(),
            transport_name: SYNC_TRANSPORT.into(),
            queue_name: "default".into(),
            priority: Priority::NORMAL,
            available_at: now,
            created_at: now,
            metadata: EnvelopeMetadata {
                retry_count: 0,
                max_retries: 0,
                idempotency_key: None,
                last_error: None,
            },
        }
    }

    #[tokio::test]
    async fn send_runs_handler_inline() {
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with: None,
        });
        let transport = transport(handler.clone());

        transport.send(envelope()).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(transport.receive(10).await.unwrap().is_empty());
        assert_eq!(transport.queue_depth(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handler_failure_is_wrapped_and_not_retried() {
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with: Some(HandlerError::retryable("upstream 503")),
        });
        let transport = transport(handler.clone());

        let err = transport.send(envelope()).await.unwrap_err();

        assert!(matches!(
            &err,
            TransportError::Handler { source, retryable: true } if source.message() == "upstream 503"
        ));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
