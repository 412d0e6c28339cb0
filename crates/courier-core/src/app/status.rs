//! Status - worker のヘルスとスループット

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::WorkerState;

/// Point-in-time view of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub name: String,
    pub state: WorkerState,
    pub running: bool,
    /// Envelopes currently being handled.
    pub processing: usize,
    pub messages_processed: u64,
    pub messages_succeeded: u64,
    pub messages_failed: u64,
}

/// Cumulative throughput since the worker was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_processed: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub average_processing_time: Duration,
}

/// Counters shared between the worker handle and its in-flight tasks.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    processing: AtomicUsize,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    busy_micros: AtomicU64,
}

impl WorkerCounters {
    pub(crate) fn begin(&self) {
        self.processing.fetch_add(1, Ordering::SeqCst);
    }

    /// `processed` is bumped before the outcome counters and read after
    /// them, so a snapshot never shows more outcomes than processed messages.
    pub(crate) fn finish(&self, success: bool, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if success {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.busy_micros.fetch_add(micros, Ordering::SeqCst);
        self.processing.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn processing(&self) -> usize {
        self.processing.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> WorkerStats {
        let total_succeeded = self.succeeded.load(Ordering::SeqCst);
        let total_failed = self.failed.load(Ordering::SeqCst);
        let busy_micros = self.busy_micros.load(Ordering::SeqCst);
        let total_processed = self.processed.load(Ordering::SeqCst);
        let average_processing_time = if total_processed == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(busy_micros / total_processed)
        };
        WorkerStats {
            total_processed,
            total_succeeded,
            total_failed,
            average_processing_time,
        }
    }
}
