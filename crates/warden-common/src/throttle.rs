//! Rate-limited, lossy delivery of bursty output to a slow consumer
//!
//! A fast producer (process console output can run at hundreds of lines per
//! second) is decoupled from a slow consumer (an event channel into a UI) by
//! a bounded queue drained at a fixed rate: at most one item per tick.
//! Overflow is shed, never pushed back: `add` must not block the pipe
//! readers feeding it.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Default queue capacity before overflow is dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Bounded, lossy, rate-limited buffer in front of a single consumer callback.
pub struct RateLimitBuffer<T> {
    tx: mpsc::Sender<T>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    drain_task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> RateLimitBuffer<T> {
    /// Create a buffer with the default queue capacity.
    ///
    /// Must be called from within a Tokio runtime: the drain loop is spawned
    /// immediately.
    pub fn new<F>(flush_interval: Duration, callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::with_capacity(flush_interval, DEFAULT_QUEUE_CAPACITY, callback)
    }

    /// Create a buffer with an explicit queue capacity.
    pub fn with_capacity<F>(flush_interval: Duration, capacity: usize, mut callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<T>(capacity);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let drain_task = tokio::spawn(async move {
            // First tick lands one full interval after creation; skipped
            // ticks are not made up, keeping the one-item-per-tick bound.
            let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match rx.try_recv() {
                            Ok(item) => callback(item),
                            Err(TryRecvError::Empty) => {}
                            Err(TryRecvError::Disconnected) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("rate-limit buffer drain loop shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            tx,
            shutdown_tx: Some(shutdown_tx),
            drain_task: Some(drain_task),
        }
    }

    /// Enqueue an item without blocking.
    ///
    /// When the queue is full the item is dropped: load shedding keeps the
    /// producer live at the cost of delivery completeness.
    pub fn add(&self, item: T) {
        let _ = self.tx.try_send(item);
    }

    /// Stop the drain loop. Queued items are discarded.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.drain_task.take() {
            let _ = task.await;
        }
    }
}

impl<T> Drop for RateLimitBuffer<T> {
    fn drop(&mut self) {
        if let Some(task) = self.drain_task.take() {
            task.abort();
        }
    }
}
