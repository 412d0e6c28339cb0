//! CourierBuilder - エンジンの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 依存の組み立て（registry → executor → transports → dispatcher）
//!
//! `build()` で検証する内容:
//! - 設定値
//! - `expect_types()` の全 type に handler が登録済みであること
//! - transport 名の重複がないこと

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::dispatcher::Dispatcher;
use super::executor::HandlerExecutor;
use super::registry::{HandlerRegistry, MessageHandler, RegistryError};
use super::scheduler::Scheduler;
use super::scheduler_loop::SchedulerLoop;
use super::worker_loop::{Worker, WorkerConfig};
use crate::config::{ConfigError, CourierConfig};
use crate::domain::{CourierError, RetryManager};
use crate::impls::{
    ExponentialBackoffRetryStrategy, QUEUE_TRANSPORT, QueueTransport, SyncTransport,
};
use crate::ports::{SharedClock, SystemClock, Transport, UlidGenerator};
use crate::typed::{Handler, TypedMessage};

/// CourierBuilder はエンジンを構築
///
/// # 使用例
/// ```ignore
/// let courier = CourierBuilder::new()
///     .with_config(CourierConfig::from_path("courier.toml")?)
///     .register_typed::<SendEmail, _>(WelcomeEmailHandler)?
///     .expect_types(&[SendEmail::TYPE])
///     .build()?;
///
/// courier.dispatcher().dispatch_typed(&email, DispatchOptions::new()).await?;
/// ```
pub struct CourierBuilder {
    config: CourierConfig,
    registry: HandlerRegistry,
    expected_types: Option<Vec<String>>,
    transports: Vec<Arc<dyn Transport>>,
    clock: SharedClock,
}

/// BuildError は構築時のエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing handlers for message types: {0:?}")]
    MissingMessageTypes(Vec<String>),

    #[error("transport '{0}' is registered more than once")]
    DuplicateTransport(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Courier(#[from] CourierError),
}

impl CourierBuilder {
    pub fn new() -> Self {
        Self {
            config: CourierConfig::default(),
            registry: HandlerRegistry::new(),
            expected_types: None,
            transports: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register(
        mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(message_type, handler)?;
        Ok(self)
    }

    pub fn register_typed<T: TypedMessage, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register_typed::<T, H>(handler)?;
        Ok(self)
    }

    /// Message types that must have a handler by the time `build()` runs.
    pub fn expect_types(mut self, message_types: &[&str]) -> Self {
        self.expected_types = Some(message_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Add a transport. Supplying one named `"queue"` replaces the built-in
    /// in-memory queue.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Courier, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_types {
            let registered = self.registry.handlers();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(*t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingMessageTypes(missing));
            }
        }

        let registry = Arc::new(self.registry);
        let executor = Arc::new(HandlerExecutor::with_config(
            Arc::clone(&registry),
            self.config.executor_config(),
        ));
        let id_generator = Arc::new(UlidGenerator::new(self.clock.clone()));

        let mut transports: Vec<Arc<dyn Transport>> =
            vec![Arc::new(SyncTransport::new(Arc::clone(&executor))) as Arc<dyn Transport>];
        transports.extend(self.transports);

        let queue_transport = if transports.iter().any(|t| t.name() == QUEUE_TRANSPORT) {
            None
        } else {
            let queue = Arc::new(
                QueueTransport::new(self.clock.clone())
                    .with_max_retries(self.config.retry.max_retries),
            );
            transports.push(queue.clone());
            Some(queue)
        };

        let mut names = HashSet::new();
        for transport in &transports {
            if !names.insert(transport.name().to_string()) {
                return Err(BuildError::DuplicateTransport(transport.name().to_string()));
            }
        }

        let dispatcher = Arc::new(Dispatcher::new(
            transports,
            id_generator.clone(),
            self.clock.clone(),
            self.config.dispatcher_config()?,
        )?);
        let retry_manager = RetryManager::new(Arc::new(ExponentialBackoffRetryStrategy::new(
            self.config.retry.clone(),
        )));
        let scheduler = Arc::new(Scheduler::new(id_generator, self.clock.clone()));

        Ok(Courier {
            config: self.config,
            registry,
            executor,
            dispatcher,
            retry_manager,
            scheduler,
            queue_transport,
            clock: self.clock,
        })
    }
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Courier は構築済みのエンジン
///
/// 各コンポーネントへの安価なハンドルを持つ。worker と scheduler loop は
/// 必要になった時点で作る。
pub struct Courier {
    config: CourierConfig,
    registry: Arc<HandlerRegistry>,
    executor: Arc<HandlerExecutor>,
    dispatcher: Arc<Dispatcher>,
    retry_manager: RetryManager,
    scheduler: Arc<Scheduler>,
    queue_transport: Option<Arc<QueueTransport>>,
    clock: SharedClock,
}

impl Courier {
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<HandlerExecutor> {
        &self.executor
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn retry_manager(&self) -> &RetryManager {
        &self.retry_manager
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The built-in queue transport, unless it was replaced via `with_transport`.
    pub fn queue_transport(&self) -> Option<&Arc<QueueTransport>> {
        self.queue_transport.as_ref()
    }

    /// Worker for `transport_name` configured from `[worker]`.
    pub fn worker(&self, transport_name: &str) -> Result<Worker, CourierError> {
        let config = self
            .config
            .worker_config(format!("{transport_name}-worker"));
        self.worker_with(transport_name, config)
    }

    pub fn worker_with(
        &self,
        transport_name: &str,
        config: WorkerConfig,
    ) -> Result<Worker, CourierError> {
        let transport = self.dispatcher.transport(transport_name).ok_or_else(|| {
            CourierError::Configuration(format!("unknown transport '{transport_name}'"))
        })?;
        Ok(Worker::new(
            transport,
            Arc::clone(&self.executor),
            self.retry_manager.clone(),
            self.clock.clone(),
            config,
        ))
    }

    /// Start the scheduler timer with `[scheduler].tick_interval_ms`.
    pub fn spawn_scheduler(&self) -> SchedulerLoop {
        SchedulerLoop::spawn(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.dispatcher),
            self.config.tick_interval(),
        )
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::app::registry::HandlerContext;
    use crate::domain::{DispatchOptions, ErrorKind, HandlerError};
    use crate::impls::SYNC_TRANSPORT;
    use crate::typed::message::fixtures::{SendEmail, SendSms};

    struct EmailHandler;

    #[async_trait]
    impl Handler<SendEmail> for EmailHandler {
        async fn handle(
            &self,
            payload: SendEmail,
            _context: &HandlerContext<'_>,
        ) -> Result<(), HandlerError> {
            if payload.to.contains('@') {
                Ok(())
            } else {
                Err(HandlerError::permanent("invalid address"))
            }
        }
    }

    fn email(to: &str) -> SendEmail {
        SendEmail {
            to: to.into(),
            template: "welcome".into(),
        }
    }

    #[test]
    fn build_succeeds_when_expected_types_are_registered() {
        let courier = CourierBuilder::new()
            .register_typed::<SendEmail, _>(EmailHandler)
            .unwrap()
            .expect_types(&[SendEmail::TYPE])
            .build();
        assert!(courier.is_ok());
    }

    #[test]
    fn build_fails_on_missing_expected_types() {
        let courier = CourierBuilder::new()
            .register_typed::<SendEmail, _>(EmailHandler)
            .unwrap()
            .expect_types(&[SendEmail::TYPE, SendSms::TYPE])
            .build();
        assert!(matches!(
            courier,
            Err(BuildError::MissingMessageTypes(missing)) if missing == vec![SendSms::TYPE.to_string()]
        ));
    }

    #[test]
    fn build_fails_on_invalid_config() {
        let mut config = CourierConfig::default();
        config.worker.batch_size = 0;

        let courier = CourierBuilder::new().with_config(config).build();
        assert!(matches!(courier, Err(BuildError::Config(_))));
    }

    #[test]
    fn default_transports_are_registered() {
        let courier = CourierBuilder::new().build().unwrap();
        assert_eq!(
            courier.dispatcher().transport_names(),
            vec![QUEUE_TRANSPORT.to_string(), SYNC_TRANSPORT.to_string()]
        );
        assert!(courier.queue_transport().is_some());
    }

    #[test]
    fn supplied_queue_transport_replaces_builtin() {
        let custom = Arc::new(QueueTransport::new(Arc::new(SystemClock)).with_deduplication(false));
        let courier = CourierBuilder::new()
            .with_transport(custom)
            .build()
            .unwrap();
        assert!(courier.queue_transport().is_none());
        assert!(courier.dispatcher().transport(QUEUE_TRANSPORT).is_some());
    }

    #[test]
    fn duplicate_transport_names_fail() {
        let clock: SharedClock = Arc::new(SystemClock);
        let courier = CourierBuilder::new()
            .with_transport(Arc::new(QueueTransport::named("bulk", clock.clone())))
            .with_transport(Arc::new(QueueTransport::named("bulk", clock)))
            .build();
        assert!(matches!(courier, Err(BuildError::DuplicateTransport(name)) if name == "bulk"));
    }

    #[test]
    fn worker_for_unknown_transport_is_a_configuration_error() {
        let courier = CourierBuilder::new().build().unwrap();
        let err = courier.worker("nope").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(courier.worker(QUEUE_TRANSPORT).unwrap().name(), "queue-worker");
    }

    #[tokio::test]
    async fn sync_dispatch_surfaces_handler_failure() {
        let courier = CourierBuilder::new()
            .register_typed::<SendEmail, _>(EmailHandler)
            .unwrap()
            .build()
            .unwrap();
        let sync = DispatchOptions::new().transport(SYNC_TRANSPORT);

        courier
            .dispatcher()
            .dispatch_typed(&email("a@example.com"), sync.clone())
            .await
            .unwrap();

        let err = courier
            .dispatcher()
            .dispatch_typed(&email("not-an-address"), sync)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn sync_dispatch_rejects_future_scheduled_at() {
        let courier = CourierBuilder::new()
            .register_typed::<SendEmail, _>(EmailHandler)
            .unwrap()
            .build()
            .unwrap();
        let now = chrono::Utc::now();

        let err = courier
            .dispatcher()
            .dispatch_typed(
                &email("a@example.com"),
                DispatchOptions::new()
                    .transport(SYNC_TRANSPORT)
                    .scheduled_at(now + chrono::Duration::days(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        // already due: handled in-line as usual
        courier
            .dispatcher()
            .dispatch_typed(
                &email("a@example.com"),
                DispatchOptions::new()
                    .transport(SYNC_TRANSPORT)
                    .scheduled_at(now - chrono::Duration::minutes(1)),
            )
            .await
            .unwrap();

        // the queue holds it instead
        courier
            .dispatcher()
            .dispatch_typed(
                &email("a@example.com"),
                DispatchOptions::new().scheduled_at(now + chrono::Duration::days(1)),
            )
            .await
            .unwrap();
        let queue = courier.queue_transport().unwrap();
        assert_eq!(queue.queue_depth(None).await.unwrap(), 1);
    }
}
