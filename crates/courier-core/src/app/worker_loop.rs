//! Worker - transport をポーリングして handler を実行
//!
//! # フロー（1 回のポーリング）
//! 1. capacity = 並行数 semaphore の空き permit 数
//! 2. `Transport::receive(min(batch_size, capacity, 残りの message 上限))`
//! 3. envelope ごとに permit を持った task を spawn
//! 4. 成功: `acknowledge`、失敗: `RetryManager` が `reject(Retry)` か
//!    `reject(DeadLetter)` を決める
//!
//! 空のポーリングでは `poll_interval` だけ待つ（`stop()` で即座に起きる）。
//! `stop()` は handler を abort しない。実行中の task は `drain_timeout`
//! まで待ち、それを過ぎたら detach する。

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::executor::HandlerExecutor;
use super::status::{WorkerCounters, WorkerHealth, WorkerStats};
use crate::domain::{MessageEnvelope, RetryManager, WorkerState};
use crate::ports::{Clock, Rejection, SharedClock, Transport};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// Upper bound for one `receive`.
    pub batch_size: usize,
    /// Handlers running at the same time.
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    /// Stop on its own once this much time has passed since `start()`.
    pub time_limit: Option<Duration>,
    /// Stop on its own once this many envelopes have been taken.
    pub message_limit: Option<u64>,
    pub drain_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            batch_size: 10,
            max_concurrency: 10,
            poll_interval: Duration::from_secs(1),
            time_limit: None,
            message_limit: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// State shared between the handle and the spawned loop.
struct Shared {
    transport: Arc<dyn Transport>,
    executor: Arc<HandlerExecutor>,
    retry_manager: RetryManager,
    clock: SharedClock,
    config: WorkerConfig,
    state: AtomicU8,
    counters: WorkerCounters,
}

impl Shared {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Worker は 1 つの transport をポーリングする
///
/// # 状態遷移
/// - `start()`: Stopped → Starting → Running
/// - `stop()` / 上限到達: Running → Stopping → Stopped
pub struct Worker {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
}

impl Worker {
    pub fn new(
        transport: Arc<dyn Transport>,
        executor: Arc<HandlerExecutor>,
        retry_manager: RetryManager,
        clock: SharedClock,
        config: WorkerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                executor,
                retry_manager,
                clock,
                config,
                state: AtomicU8::new(WorkerState::Stopped.as_u8()),
                counters: WorkerCounters::default(),
            }),
            run: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Start polling. A running worker is left alone; a worker that is still
    /// draining from a previous run is waited for first.
    pub async fn start(&self) {
        let mut run = self.run.lock().await;

        if let Some(previous) = run.take() {
            if self.shared.state().is_running() && !previous.join.is_finished() {
                *run = Some(previous);
                return;
            }
            if let Err(e) = previous.join.await {
                error!(worker = %self.shared.config.name, error = %e, "previous worker run failed");
            }
        }

        self.shared.set_state(WorkerState::Starting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let join = tokio::spawn(run_loop(shared, shutdown_rx));
        *run = Some(RunHandle { shutdown_tx, join });
    }

    /// Stop polling and wait for the drain. Idempotent.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(current) = run.take() else {
            return;
        };

        // ignore send error: the loop may already have exited
        let _ = current.shutdown_tx.send(true);
        if let Err(e) = current.join.await {
            error!(worker = %self.shared.config.name, error = %e, "worker loop failed");
            self.shared.set_state(WorkerState::Stopped);
        }
    }

    pub fn health(&self) -> WorkerHealth {
        let state = self.shared.state();
        let stats = self.shared.counters.stats();
        WorkerHealth {
            name: self.shared.config.name.clone(),
            state,
            running: state.is_running(),
            processing: self.shared.counters.processing(),
            messages_processed: stats.total_processed,
            messages_succeeded: stats.total_succeeded,
            messages_failed: stats.total_failed,
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.shared.counters.stats()
    }
}

fn shutdown_requested(rx: &watch::Receiver<bool>) -> bool {
    // a dropped sender means the handle is gone
    *rx.borrow() || rx.has_changed().is_err()
}

/// Sleep for `period`, returning early if shutdown is requested.
async fn idle(rx: &mut watch::Receiver<bool>, period: Duration) {
    tokio::select! {
        _ = rx.changed() => {}
        _ = tokio::time::sleep(period) => {}
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let config = &shared.config;
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut in_flight = JoinSet::new();
    let mut taken: u64 = 0;

    shared.set_state(WorkerState::Running);
    info!(
        worker = %config.name,
        transport = %shared.transport.name(),
        batch_size = config.batch_size,
        max_concurrency = config.max_concurrency,
        "worker started"
    );

    loop {
        if shutdown_requested(&shutdown_rx) {
            break;
        }

        while let Some(result) = in_flight.try_join_next() {
            log_task_result(&config.name, result);
        }

        if config.time_limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!(worker = %config.name, "time limit reached");
            break;
        }

        let remaining = config.message_limit.map(|limit| limit.saturating_sub(taken));
        if remaining == Some(0) {
            info!(worker = %config.name, taken, "message limit reached");
            break;
        }

        let capacity = semaphore.available_permits();
        if capacity == 0 {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                Some(result) = in_flight.join_next() => log_task_result(&config.name, result),
            }
            continue;
        }

        let mut want = config.batch_size.max(1).min(capacity);
        if let Some(remaining) = remaining {
            want = want.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }

        let batch = match shared.transport.receive(want).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(worker = %config.name, error = %e, "receive failed");
                idle(&mut shutdown_rx, config.poll_interval).await;
                continue;
            }
        };

        if batch.is_empty() {
            idle(&mut shutdown_rx, config.poll_interval).await;
            continue;
        }

        debug!(worker = %config.name, count = batch.len(), "received batch");
        taken += batch.len() as u64;

        for envelope in batch {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let shared = Arc::clone(&shared);
            shared.counters.begin();
            in_flight.spawn(async move {
                let _permit = permit;
                process(&shared, envelope).await;
            });
        }
    }

    shared.set_state(WorkerState::Stopping);
    drain(config, &mut in_flight).await;
    shared.set_state(WorkerState::Stopped);
    info!(worker = %config.name, "worker stopped");
}

async fn drain(config: &WorkerConfig, in_flight: &mut JoinSet<()>) {
    if in_flight.is_empty() {
        return;
    }

    info!(
        worker = %config.name,
        count = in_flight.len(),
        "waiting for in-flight messages"
    );
    let drained = tokio::time::timeout(config.drain_timeout, async {
        while let Some(result) = in_flight.join_next().await {
            log_task_result(&config.name, result);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            worker = %config.name,
            count = in_flight.len(),
            "drain timeout elapsed, detaching in-flight handlers"
        );
        in_flight.detach_all();
    }
}

fn log_task_result(worker: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(worker = %worker, error = %e, "message task failed");
    }
}

/// Execute one envelope and settle it with the transport.
async fn process(shared: &Shared, envelope: MessageEnvelope) {
    let result = shared.executor.execute(&envelope).await;

    match &result.error {
        None => {
            if let Err(e) = shared.transport.acknowledge(&envelope).await {
                error!(message_id = %envelope.id, error = %e, "failed to acknowledge");
            } else {
                debug!(
                    message_id = %envelope.id,
                    message_type = %envelope.message_type(),
                    "message handled"
                );
            }
        }
        Some(err) => {
            let decision = shared.retry_manager.determine_retry_action(&envelope, err);
            let rejection = if decision.should_retry {
                let available_at = shared.retry_manager.strategy().get_next_available_time(
                    envelope.retry_count(),
                    envelope.message_type(),
                    shared.clock.now(),
                );
                warn!(
                    message_id = %envelope.id,
                    message_type = %envelope.message_type(),
                    retry_count = decision.new_retry_count,
                    delay_ms = decision.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
                    error = %err,
                    "handler failed, retrying"
                );
                Rejection::Retry {
                    retry_count: decision.new_retry_count,
                    available_at,
                    error: err.message().to_string(),
                }
            } else {
                warn!(
                    message_id = %envelope.id,
                    message_type = %envelope.message_type(),
                    queue = %envelope.queue_name,
                    reason = %decision.reason,
                    "dead-lettering message"
                );
                Rejection::DeadLetter {
                    reason: decision.reason,
                }
            };

            if let Err(e) = shared.transport.reject(&envelope, rejection).await {
                error!(message_id = %envelope.id, error = %e, "failed to reject");
            }
        }
    }

    shared.counters.finish(result.is_success(), result.elapsed);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::app::registry::{HandlerContext, HandlerRegistry, MessageHandler};
    use crate::domain::{DispatchOptions, HandlerError, Message};
    use crate::app::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::impls::{ExponentialBackoffRetryStrategy, QueueTransport};
    use crate::ports::{FixedClock, UlidGenerator};

    /// Sleeps, then answers with a fixed result; tracks peak concurrency.
    struct Recorder {
        delay: Duration,
        result: Result<(), HandlerError>,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(delay: Duration, result: Result<(), HandlerError>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                result,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(
            &self,
            _message: &Message,
            _envelope: &MessageEnvelope,
            _context: &HandlerContext<'_>,
        ) -> Result<(), HandlerError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Fixture {
        transport: Arc<QueueTransport>,
        dispatcher: Dispatcher,
        executor: Arc<HandlerExecutor>,
        clock: SharedClock,
    }

    fn fixture(handler: Arc<dyn MessageHandler>) -> Fixture {
        let clock: SharedClock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        ));
        let mut registry = HandlerRegistry::new();
        registry.register("report.render", handler).unwrap();
        let executor = Arc::new(HandlerExecutor::new(Arc::new(registry)));
        let transport = Arc::new(QueueTransport::new(clock.clone()));
        let dispatcher = Dispatcher::new(
            [transport.clone() as Arc<dyn Transport>],
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
            DispatcherConfig::default(),
        )
        .unwrap();
        Fixture {
            transport,
            dispatcher,
            executor,
            clock,
        }
    }

    impl Fixture {
        fn worker(&self, config: WorkerConfig) -> Worker {
            Worker::new(
                self.transport.clone(),
                self.executor.clone(),
                RetryManager::new(Arc::new(ExponentialBackoffRetryStrategy::default())),
                self.clock.clone(),
                config,
            )
        }

        async fn dispatch(&self, n: usize) {
            for i in 0..n {
                self.dispatcher
                    .dispatch(
                        Message::new("report.render", serde_json::json!({ "n": i })),
                        DispatchOptions::new(),
                    )
                    .await
                    .unwrap();
            }
        }
    }

    fn fast(config: WorkerConfig) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(5),
            ..config
        }
    }

    async fn wait_until_stopped(worker: &Worker) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while worker.state() != WorkerState::Stopped {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn processes_and_acknowledges_until_message_limit() {
        let recorder = Recorder::new(Duration::ZERO, Ok(()));
        let fx = fixture(recorder.clone());
        fx.dispatch(3).await;

        let worker = fx.worker(fast(WorkerConfig {
            message_limit: Some(3),
            ..WorkerConfig::default()
        }));
        worker.start().await;
        wait_until_stopped(&worker).await;

        let stats = worker.stats();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.total_succeeded, 3);
        assert_eq!(fx.transport.queue_depth(None).await.unwrap(), 0);
        assert!(!worker.health().running);
    }

    #[tokio::test]
    async fn message_limit_is_never_exceeded() {
        let recorder = Recorder::new(Duration::ZERO, Ok(()));
        let fx = fixture(recorder.clone());
        fx.dispatch(5).await;

        let worker = fx.worker(fast(WorkerConfig {
            batch_size: 10,
            message_limit: Some(2),
            ..WorkerConfig::default()
        }));
        worker.start().await;
        wait_until_stopped(&worker).await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.transport.queue_depth(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let recorder = Recorder::new(Duration::from_millis(20), Ok(()));
        let fx = fixture(recorder.clone());
        fx.dispatch(8).await;

        let worker = fx.worker(fast(WorkerConfig {
            batch_size: 8,
            max_concurrency: 2,
            message_limit: Some(8),
            ..WorkerConfig::default()
        }));
        worker.start().await;
        wait_until_stopped(&worker).await;

        assert_eq!(worker.stats().total_succeeded, 8);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn retryable_failure_is_requeued_for_later() {
        let recorder = Recorder::new(Duration::ZERO, Err(HandlerError::retryable("smtp timeout")));
        let fx = fixture(recorder.clone());
        fx.dispatch(1).await;

        let worker = fx.worker(fast(WorkerConfig {
            message_limit: Some(1),
            ..WorkerConfig::default()
        }));
        worker.start().await;
        wait_until_stopped(&worker).await;

        assert_eq!(worker.stats().total_failed, 1);
        assert_eq!(fx.transport.queue_depth(Some("default")).await.unwrap(), 1);
        // backoff puts it in the future of the (frozen) clock
        assert!(fx.transport.receive(1).await.unwrap().is_empty());
        assert_eq!(fx.transport.queue_depth(Some("default.dead")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_is_dead_lettered() {
        let recorder = Recorder::new(Duration::ZERO, Err(HandlerError::permanent("bad address")));
        let fx = fixture(recorder.clone());
        fx.dispatch(1).await;

        let worker = fx.worker(fast(WorkerConfig {
            message_limit: Some(1),
            ..WorkerConfig::default()
        }));
        worker.start().await;
        wait_until_stopped(&worker).await;

        assert_eq!(fx.transport.queue_depth(Some("default")).await.unwrap(), 0);
        assert_eq!(fx.transport.queue_depth(Some("default.dead")).await.unwrap(), 1);
        assert_eq!(worker.health().messages_failed, 1);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_handlers() {
        let recorder = Recorder::new(Duration::from_millis(100), Ok(()));
        let fx = fixture(recorder.clone());
        fx.dispatch(1).await;

        let worker = fx.worker(fast(WorkerConfig::default()));
        worker.start().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        worker.stop().await;

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.stats().total_succeeded, 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let fx = fixture(Recorder::new(Duration::ZERO, Ok(())));
        let worker = fx.worker(fast(WorkerConfig::default()));

        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Stopped);

        worker.start().await;
        worker.start().await;
        assert!(worker.health().running);

        worker.stop().await;
        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn time_limit_stops_the_worker() {
        let fx = fixture(Recorder::new(Duration::ZERO, Ok(())));
        let worker = fx.worker(fast(WorkerConfig {
            time_limit: Some(Duration::from_millis(30)),
            ..WorkerConfig::default()
        }));

        worker.start().await;
        wait_until_stopped(&worker).await;

        assert!(!worker.health().running);
    }

    #[tokio::test]
    async fn worker_can_restart_after_self_stop() {
        let recorder = Recorder::new(Duration::ZERO, Ok(()));
        let fx = fixture(recorder.clone());
        fx.dispatch(2).await;

        let worker = fx.worker(fast(WorkerConfig {
            message_limit: Some(1),
            ..WorkerConfig::default()
        }));
        worker.start().await;
        wait_until_stopped(&worker).await;
        worker.start().await;
        wait_until_stopped(&worker).await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
    }
}
