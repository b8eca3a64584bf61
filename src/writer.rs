// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Asynchronous audit writer
//
// Records are pushed onto a bounded lock-free queue and drained by a fixed
// pool of tokio tasks into a storage backend. Enqueue never waits: when the
// queue is full the record is dropped and reported.

use crate::config::WriterConfig;
use crate::error::{AuditError, Result};
use crate::record::Record;
use crate::storage::Storage;
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Called with a record that could not be queued
pub type EnqueueFailedFn = Arc<dyn Fn(&Record) + Send + Sync>;

/// Called with a record the backend failed to persist
pub type WriteFailedFn = Arc<dyn Fn(&Record, &AuditError) + Send + Sync>;

/// Lifecycle of an [`AsyncWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WriterState {
    Created = 0,
    Started = 1,
    Stopping = 2,
    Stopped = 3,
}

impl WriterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WriterState::Created,
            1 => WriterState::Started,
            2 => WriterState::Stopping,
            _ => WriterState::Stopped,
        }
    }
}

/// Point-in-time writer statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Records waiting in the queue; 0 once stop has begun
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub workers: usize,
    pub started: bool,
    pub stopped: bool,
    /// Records rejected by enqueue
    pub dropped: u64,
    /// Records the backend failed to write
    pub write_failures: u64,
}

/// State shared between the writer handle and its workers
struct Shared {
    queue: ArrayQueue<Record>,
    notify: Notify,
    storage: Arc<dyn Storage>,
    on_write_failed: Option<WriteFailedFn>,
    write_failures: AtomicU64,
}

impl Shared {
    async fn write_record(&self, worker_id: usize, record: Record) {
        if let Err(e) = self.storage.write(&record).await {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            match &self.on_write_failed {
                Some(callback) => callback(&record, &e),
                None => error!(
                    worker = worker_id,
                    event_type = %record.event_type,
                    error = %e,
                    "Failed to write audit record"
                ),
            }
        }
    }

    /// Write everything currently queued
    async fn drain(&self, worker_id: usize) -> usize {
        let mut written = 0;
        while let Some(record) = self.queue.pop() {
            self.write_record(worker_id, record).await;
            written += 1;
        }
        written
    }
}

pub struct AsyncWriter {
    shared: Arc<Shared>,
    state: AtomicU8,
    workers: usize,
    stop_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    on_enqueue_failed: Option<EnqueueFailedFn>,
    dropped: AtomicU64,
}

impl AsyncWriter {
    /// Create a writer; zero-valued settings fall back to defaults
    pub fn new(storage: Arc<dyn Storage>, config: &WriterConfig) -> Self {
        Self::build(storage, config, None, None)
    }

    pub fn builder(storage: Arc<dyn Storage>) -> AsyncWriterBuilder {
        AsyncWriterBuilder {
            storage,
            config: WriterConfig::default(),
            on_enqueue_failed: None,
            on_write_failed: None,
        }
    }

    fn build(
        storage: Arc<dyn Storage>,
        config: &WriterConfig,
        on_enqueue_failed: Option<EnqueueFailedFn>,
        on_write_failed: Option<WriteFailedFn>,
    ) -> Self {
        let config = config.sanitized();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                queue: ArrayQueue::new(config.queue_size),
                notify: Notify::new(),
                storage,
                on_write_failed,
                write_failures: AtomicU64::new(0),
            }),
            state: AtomicU8::new(WriterState::Created as u8),
            workers: config.workers,
            stop_timeout: config.stop_timeout(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            on_enqueue_failed,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WriterState {
        WriterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: WriterState, to: WriterState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Spawn the worker pool. Only the first call has any effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.transition(WriterState::Created, WriterState::Started) {
            debug!("Audit writer already started");
            return;
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for worker_id in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(run_worker(worker_id, shared, shutdown_rx)));
        }

        info!(
            "Started {} audit writer workers (queue capacity {})",
            self.workers,
            self.shared.queue.capacity()
        );
    }

    /// Queue a record without waiting
    ///
    /// Returns false if the queue is full or the writer is stopping; the
    /// record is then dropped and reported through `on_enqueue_failed`.
    pub fn enqueue(&self, record: Record) -> bool {
        if matches!(self.state(), WriterState::Stopping | WriterState::Stopped) {
            self.reject(&record, "writer stopped");
            return false;
        }

        match self.shared.queue.push(record) {
            Ok(()) if self.state() == WriterState::Stopped => {
                // stop() may already be past its final drain.
                self.reject_orphans();
                false
            }
            Ok(()) => {
                self.shared.notify.notify_one();
                true
            }
            Err(record) => {
                self.reject(&record, "queue full");
                false
            }
        }
    }

    /// Report records left in the queue once no worker will drain it
    fn reject_orphans(&self) {
        while let Some(record) = self.shared.queue.pop() {
            self.reject(&record, "writer stopped");
        }
    }

    fn reject(&self, record: &Record, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        match &self.on_enqueue_failed {
            Some(callback) => callback(record),
            None => warn!(
                event_type = %record.event_type,
                user_id = record.user_id.as_deref().unwrap_or(""),
                "Dropping audit record: {}",
                reason
            ),
        }
    }

    /// Drain the queue, wait for the workers and close the backend
    ///
    /// Waits at most `stop_timeout` for the workers; records still in flight
    /// after that may be lost. Calls after the first return `Ok(())`.
    pub async fn stop(&self) -> Result<()> {
        let previous = if self.transition(WriterState::Started, WriterState::Stopping) {
            WriterState::Started
        } else if self.transition(WriterState::Created, WriterState::Stopping) {
            WriterState::Created
        } else {
            return Ok(());
        };

        info!("Stopping audit writer...");
        self.shutdown_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        let shared = Arc::clone(&self.shared);

        let wait = async move {
            if previous == WriterState::Created {
                // Never started: flush whatever was queued inline.
                shared.drain(0).await;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Audit writer worker panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(self.stop_timeout, wait).await {
            Ok(()) => info!("All audit writer workers stopped"),
            Err(_) => warn!(
                "Timed out after {:?} waiting for audit writer workers",
                self.stop_timeout
            ),
        }

        self.state.store(WriterState::Stopped as u8, Ordering::SeqCst);

        // Pick up pushes that raced the workers' last drain; later pushes see
        // Stopped and reject themselves.
        match tokio::time::timeout(self.stop_timeout, self.shared.drain(0)).await {
            Ok(0) => {}
            Ok(n) => debug!("Wrote {} audit records queued during shutdown", n),
            Err(_) => warn!("Timed out writing audit records queued during shutdown"),
        }

        self.shared.storage.close().await
    }

    pub fn stats(&self) -> WriterStats {
        let state = self.state();
        let stopped = matches!(state, WriterState::Stopping | WriterState::Stopped);

        WriterStats {
            queue_length: if stopped { 0 } else { self.shared.queue.len() },
            queue_capacity: self.shared.queue.capacity(),
            workers: self.workers,
            started: state != WriterState::Created,
            stopped,
            dropped: self.dropped.load(Ordering::Relaxed),
            write_failures: self.shared.write_failures.load(Ordering::Relaxed),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.shared.storage
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        // Let workers finish the backlog and exit if stop() was never called.
        self.shutdown_tx.send_replace(true);
    }
}

async fn run_worker(worker_id: usize, shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!("Audit writer worker {} started", worker_id);

    loop {
        shared.drain(worker_id).await;

        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = shared.notify.notified() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    // Pick up anything pushed while shutdown was being signalled.
    let drained = shared.drain(worker_id).await;
    debug!(
        "Audit writer worker {} exiting after draining {} records",
        worker_id, drained
    );
}

/// Builder for an [`AsyncWriter`] with monitoring callbacks
pub struct AsyncWriterBuilder {
    storage: Arc<dyn Storage>,
    config: WriterConfig,
    on_enqueue_failed: Option<EnqueueFailedFn>,
    on_write_failed: Option<WriteFailedFn>,
}

impl AsyncWriterBuilder {
    pub fn config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_enqueue_failed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.on_enqueue_failed = Some(Arc::new(callback));
        self
    }

    pub fn on_write_failed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Record, &AuditError) + Send + Sync + 'static,
    {
        self.on_write_failed = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> AsyncWriter {
        AsyncWriter::build(
            self.storage,
            &self.config,
            self.on_enqueue_failed,
            self.on_write_failed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::QueryFilter;
    use crate::record::{EventResult, EventType};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct CountingStorage {
        writes: AtomicU64,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Storage for CountingStorage {
        async fn write(&self, _record: &Record) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn query(&self, _filter: &QueryFilter) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn backend_type(&self) -> &str {
            "counting"
        }
    }

    fn record() -> Record {
        Record::new(EventType::SendSuccess, EventResult::Success)
    }

    #[test]
    fn test_zero_config_uses_defaults() {
        let writer = AsyncWriter::new(
            Arc::new(CountingStorage::default()),
            &WriterConfig {
                queue_size: 0,
                workers: 0,
                stop_timeout_ms: 0,
            },
        );

        let stats = writer.stats();
        assert_eq!(stats.queue_capacity, 1000);
        assert_eq!(stats.workers, 2);
        assert_eq!(writer.stop_timeout, Duration::from_secs(10));
        assert_eq!(writer.state(), WriterState::Created);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let storage = Arc::new(CountingStorage::default());
        let writer = AsyncWriter::new(storage.clone(), &WriterConfig::default());

        writer.start();
        assert_eq!(writer.state(), WriterState::Started);
        writer.start();
        assert_eq!(writer.handles.lock().unwrap().len(), 2);

        writer.stop().await.unwrap();
        assert_eq!(writer.state(), WriterState::Stopped);
        assert!(storage.closed.load(Ordering::SeqCst));

        writer.start();
        assert_eq!(writer.state(), WriterState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_without_start_flushes_queue() {
        let storage = Arc::new(CountingStorage::default());
        let writer = AsyncWriter::new(storage.clone(), &WriterConfig::default());

        assert!(writer.enqueue(record()));
        assert!(writer.enqueue(record()));
        writer.stop().await.unwrap();

        assert_eq!(storage.writes.load(Ordering::SeqCst), 2);
        assert!(writer.stats().stopped);
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let writer = AsyncWriter::new(
            Arc::new(CountingStorage::default()),
            &WriterConfig {
                queue_size: 2,
                ..Default::default()
            },
        );

        assert!(writer.enqueue(record()));
        assert!(writer.enqueue(record()));
        assert!(!writer.enqueue(record()));

        let stats = writer.stats();
        assert_eq!(stats.queue_length, 2);
        assert_eq!(stats.queue_capacity, 2);
        assert_eq!(stats.dropped, 1);
        assert!(!stats.started);

        writer.start();
        writer.stop().await.unwrap();

        let stats = writer.stats();
        assert_eq!(stats.queue_length, 0);
        assert!(stats.started);
        assert!(stats.stopped);
    }

    #[tokio::test]
    async fn test_push_after_workers_exit_is_written_by_stop() {
        let storage = Arc::new(CountingStorage::default());
        let writer = AsyncWriter::new(storage.clone(), &WriterConfig::default());
        writer.start();

        writer.shutdown_tx.send_replace(true);
        let handles = std::mem::take(&mut *writer.handles.lock().unwrap());
        for handle in handles {
            handle.await.unwrap();
        }

        // No worker is left to drain this one.
        writer.shared.queue.push(record()).unwrap();
        writer.stop().await.unwrap();

        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
        assert!(writer.shared.queue.is_empty());
    }

    #[tokio::test]
    async fn test_orphans_reported_once_stopped() {
        let rejected = Arc::new(AtomicU64::new(0));
        let rejected_cb = rejected.clone();
        let writer = AsyncWriter::builder(Arc::new(CountingStorage::default()))
            .on_enqueue_failed(move |_| {
                rejected_cb.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        writer.stop().await.unwrap();

        writer.shared.queue.push(record()).unwrap();
        writer.shared.queue.push(record()).unwrap();
        writer.reject_orphans();

        assert_eq!(rejected.load(Ordering::SeqCst), 2);
        assert_eq!(writer.stats().dropped, 2);
        assert!(writer.shared.queue.is_empty());
    }
}
