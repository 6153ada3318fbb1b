//! Bounded per-endpoint batch queue.
//!
//! Single consumer (the endpoint's sender task), many producers (the
//! scheduler tick). Capacity is bounded in batches; the overflow policy is
//! the operator's choice: raise `QueueFull` to the enqueuer, or drop the
//! newest batch and let the caller surface it once through the error
//! callback.

use crate::core::{Result, TallyError};
use crate::transport::Batch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Outcome of an enqueue under the drop policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Batch accepted
    Queued,
    /// Queue was full; the new batch was discarded
    DroppedNewest,
}

/// Bounded FIFO of serialized batches.
pub struct BatchQueue {
    inner: Mutex<VecDeque<Batch>>,
    capacity: usize,
    throw_on_full: bool,
    closed: AtomicBool,
    notify: Notify,
    dropped: AtomicU64,
}

impl BatchQueue {
    /// Create a queue with the given capacity and overflow policy.
    pub fn new(capacity: usize, throw_on_full: bool) -> Self {
        BatchQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            throw_on_full,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a batch, applying the overflow policy when full.
    pub fn push(&self, batch: Batch) -> Result<Enqueue> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TallyError::ChannelClosed);
        }

        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.capacity {
                if self.throw_on_full {
                    return Err(TallyError::QueueFull {
                        payload: batch.payload.as_str(),
                        capacity: self.capacity,
                    });
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(Enqueue::DroppedNewest);
            }
            queue.push_back(batch);
        }

        self.notify.notify_one();
        Ok(Enqueue::Queued)
    }

    /// Dequeue the next batch, waiting until one arrives. Returns `None`
    /// once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Batch> {
        loop {
            // Register for a wakeup before re-checking, so a push between
            // the check and the await is not missed.
            let notified = self.notify.notified();

            if let Some(batch) = self.inner.lock().pop_front() {
                return Some(batch);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    /// Stop accepting batches and wake the consumer so it can drain out.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Configured capacity in batches.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Batches currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Total batches discarded under the drop policy.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
