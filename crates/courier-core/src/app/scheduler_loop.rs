//! SchedulerLoop - タイマーで `Scheduler::tick` を回す

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;
use super::scheduler::Scheduler;

/// Handle of a running scheduler loop.
/// - `shutdown()` stops the timer and waits for the current tick to finish
/// - dropping the handle without `shutdown()` also ends the loop
pub struct SchedulerLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerLoop {
    pub fn spawn(
        scheduler: Arc<Scheduler>,
        dispatcher: Arc<Dispatcher>,
        tick_interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(tick_ms = tick_interval.as_millis() as u64, "scheduler started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // Err: handle dropped
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let fired = scheduler.tick(&dispatcher).await;
                        if fired > 0 {
                            debug!(fired, "scheduler tick");
                        }
                    }
                }
            }

            info!("scheduler stopped");
        });

        Self { shutdown_tx, join }
    }

    pub async fn shutdown(self) {
        // ignore send error: the loop may already have exited
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "scheduler loop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::*;
    use crate::app::dispatcher::DispatcherConfig;
    use crate::domain::{Message, MessageEnvelope, ScheduleConfig, TransportError};
    use crate::ports::{Clock, Rejection, SharedClock, SystemClock, Transport, UlidGenerator};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<MessageEnvelope>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        fn name(&self) -> &str {
            "queue"
        }

        async fn send(&self, envelope: MessageEnvelope) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }

        async fn receive(&self, _: usize) -> Result<Vec<MessageEnvelope>, TransportError> {
            Ok(Vec::new())
        }

        async fn acknowledge(&self, _: &MessageEnvelope) -> Result<(), TransportError> {
            Ok(())
        }

        async fn reject(&self, _: &MessageEnvelope, _: Rejection) -> Result<(), TransportError> {
            Ok(())
        }

        async fn queue_depth(&self, _: Option<&str>) -> Result<usize, TransportError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn loop_fires_due_schedules_until_shutdown() {
        let clock: SharedClock = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Arc::new(
            Dispatcher::new(
                [recorder.clone() as Arc<dyn Transport>],
                ids.clone(),
                clock.clone(),
                DispatcherConfig::default(),
            )
            .unwrap(),
        );
        let scheduler = Arc::new(Scheduler::new(ids, clock.clone()));
        scheduler
            .schedule(
                Message::new("cache.warm", serde_json::json!({})),
                ScheduleConfig::once(clock.now()),
            )
            .await
            .unwrap();

        let handle = SchedulerLoop::spawn(scheduler.clone(), dispatcher, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.sent.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.shutdown().await;

        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
        assert!(scheduler.is_empty().await);
    }
}
