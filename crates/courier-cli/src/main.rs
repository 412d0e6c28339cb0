use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_core::app::HandlerContext;
use courier_core::domain::MessageEnvelope;
use courier_core::impls::QUEUE_TRANSPORT;
use courier_core::typed::{Handler, TypedMessage};
use courier_core::{
    CourierBuilder, CourierConfig, DispatchOptions, HandlerError, Message, MessageHandler,
    ScheduleConfig,
};

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl TypedMessage for Hello {
    const TYPE: &'static str = "demo.hello.v1";
}

/// Fails a few times before succeeding, to exercise the retry path.
struct HelloHandler {
    remaining_failures: AtomicU32,
    done: Arc<AtomicBool>,
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, payload: Hello, context: &HandlerContext<'_>) -> Result<(), HandlerError> {
        let left = self.remaining_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(HandlerError::retryable(format!(
                "intentional failure (left={left}, attempt={})",
                context.retry_count + 1
            )));
        }

        info!(name = %payload.name, retry_count = context.retry_count, "hello");
        self.done.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct TickHandler;

#[async_trait]
impl MessageHandler for TickHandler {
    async fn handle(
        &self,
        message: &Message,
        envelope: &MessageEnvelope,
        _context: &HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        info!(message_id = %envelope.id, payload = %message.payload(), "tick");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CourierConfig::from_path(&path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => CourierConfig::default(),
    };

    let done = Arc::new(AtomicBool::new(false));
    let courier = CourierBuilder::new()
        .with_config(config)
        .register_typed::<Hello, _>(HelloHandler {
            remaining_failures: AtomicU32::new(2),
            done: Arc::clone(&done),
        })?
        .register("demo.tick", Arc::new(TickHandler))?
        .expect_types(&[Hello::TYPE, "demo.tick"])
        .build()?;

    let dispatcher = courier.dispatcher();
    let result = dispatcher
        .dispatch_typed(
            &Hello {
                name: "courier".into(),
            },
            DispatchOptions::new().priority(8),
        )
        .await?;
    info!(message_id = %result.message_id, "dispatched hello");

    // nobody handles this type, so it ends up dead-lettered
    dispatcher
        .dispatch(
            Message::new("demo.unhandled", serde_json::json!({})),
            DispatchOptions::new(),
        )
        .await?;

    courier
        .scheduler()
        .schedule(
            Message::new("demo.tick", serde_json::json!({ "source": "interval" })),
            ScheduleConfig::interval(Duration::from_secs(1)),
        )
        .await?;
    let scheduler = courier.spawn_scheduler();

    let worker = courier.worker(QUEUE_TRANSPORT)?;
    worker.start().await;

    tokio::select! {
        _ = async {
            while !done.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(50)).await;
            }
        } => info!("hello handled"),
        _ = sleep(Duration::from_secs(30)) => warn!("gave up waiting for hello"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    worker.stop().await;
    scheduler.shutdown().await;

    let stats = worker.stats();
    info!(
        processed = stats.total_processed,
        succeeded = stats.total_succeeded,
        failed = stats.total_failed,
        average_ms = stats.average_processing_time.as_millis() as u64,
        "worker stats"
    );
    if let Some(queue) = courier.queue_transport() {
        for envelope in queue.dead_letters(&courier.config().default_queue).await {
            warn!(
                message_id = %envelope.id,
                message_type = %envelope.message_type(),
                reason = envelope.metadata.last_error.as_deref().unwrap_or(""),
                "dead letter"
            );
        }
    }

    Ok(())
}
