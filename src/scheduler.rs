//! Reduce scheduler.
//!
//! Drains the reduce task outbox of an [`IndexStorage`] and runs one reduce
//! pass per task, either on demand ([`ReduceScheduler::run_pending`]) or from a
//! background thread polling the outbox ([`ReduceScheduler::start`]).
//!
//! A task leaves the outbox only once its reduce pass has run. A pass that
//! errors (for example on a detached index) puts the task back, to be retried
//! on the next drain.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{DivanError, Result};
use crate::index::IndexingReport;
use crate::storage::IndexStorage;

/// Configuration for the reduce scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between polls of an empty outbox.
    pub poll_interval_ms: u64,
    /// Tasks taken from the outbox at once.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            poll_interval_ms: 500,
            batch_size: 64,
        }
    }
}

/// Counters of executed tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Executes deferred reduce tasks.
#[derive(Debug)]
pub struct ReduceScheduler {
    storage: Arc<IndexStorage>,
    config: SchedulerConfig,
    stats: Arc<RwLock<SchedulerStats>>,
    stop_sender: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ReduceScheduler {
    pub fn new(storage: Arc<IndexStorage>, config: SchedulerConfig) -> Self {
        ReduceScheduler {
            storage,
            config,
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            stop_sender: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Run every pending task on the calling thread, including tasks enqueued
    /// while draining. Tasks whose pass errors stay pending.
    pub fn run_pending(&self) -> Result<IndexingReport> {
        Self::drain(&self.storage, self.config.batch_size, &self.stats)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Start polling the outbox from a background thread.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(DivanError::other("Reduce scheduler already running"));
        }

        let (stop_sender, stop_receiver) = bounded::<()>(1);
        let storage = Arc::clone(&self.storage);
        let stats = Arc::clone(&self.stats);
        let batch_size = self.config.batch_size;
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        let handle = thread::Builder::new()
            .name("divan-reduce".to_string())
            .spawn(move || {
                loop {
                    if let Err(e) = Self::drain(&storage, batch_size, &stats) {
                        error!("Reduce scheduler failed to drain the outbox: {e}");
                    }
                    match stop_receiver.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Reduce scheduler stopped");
            })?;

        *worker = Some(handle);
        *self.stop_sender.lock() = Some(stop_sender);
        info!("Reduce scheduler started");
        Ok(())
    }

    /// Signal the background thread and wait for it to finish the batch in
    /// progress.
    pub fn stop(&self) -> Result<()> {
        if let Some(sender) = self.stop_sender.lock().take() {
            let _ = sender.send(());
        }
        if let Some(handle) = self.worker.lock().take() {
            handle
                .join()
                .map_err(|_| DivanError::other("Reduce scheduler thread panicked"))?;
        }
        Ok(())
    }

    fn drain(
        storage: &IndexStorage,
        batch_size: usize,
        stats: &RwLock<SchedulerStats>,
    ) -> Result<IndexingReport> {
        let tracker = storage.tracker();
        let mut report = IndexingReport::new();
        let mut retry = Vec::new();
        loop {
            let tasks = tracker.take_tasks(batch_size.max(1))?;
            if tasks.is_empty() {
                break;
            }

            for task in tasks {
                match storage.reduce(&task.index, &task.reduce_key) {
                    Ok(outcome) => {
                        tracker.complete_task(&task)?;
                        let mut stats = stats.write();
                        if outcome.is_success() {
                            stats.tasks_completed += 1;
                        } else {
                            stats.tasks_failed += 1;
                        }
                        drop(stats);
                        report.merge(outcome);
                    }
                    Err(e) => {
                        stats.write().tasks_failed += 1;
                        report.record_failure(format!("{} / {}", task.index, task.reduce_key), e);
                        retry.push(task);
                    }
                }
            }
        }

        if !retry.is_empty() {
            debug!("Returning {} failed reduce tasks to the outbox", retry.len());
        }
        for task in &retry {
            tracker.release_task(task)?;
        }
        Ok(report)
    }
}

impl Drop for ReduceScheduler {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
