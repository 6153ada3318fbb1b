//! Per-endpoint batching and asynchronous sending.
//!
//! Each endpoint owns its batch buffers, a bounded queue, and one sender
//! task. The scheduler feeds readings in during a tick and flushes at the
//! end of it; the sender task ships batches through the handler with the
//! configured retry policy and never blocks the tick.

use crate::core::config::TransportConfig;
use crate::core::{retry_with_config, Result, RetryConfig, TallyError};
use crate::transport::buffer::PayloadBuffer;
use crate::transport::queue::{BatchQueue, Enqueue};
use crate::transport::{Batch, Endpoint, ErrorCallback, MetricReading, PayloadType};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Transport pipeline for one endpoint.
pub struct EndpointSender {
    name: String,
    queue: Arc<BatchQueue>,
    /// Tick-side batch buffers, one per payload kind. Touched only by the
    /// scheduler, so the lock is uncontended.
    buffers: Mutex<Vec<PayloadBuffer>>,
    callback: ErrorCallback,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EndpointSender {
    /// Spawn the sender task for an endpoint.
    pub fn spawn(endpoint: Endpoint, config: &TransportConfig, callback: ErrorCallback) -> Arc<Self> {
        let queue = Arc::new(BatchQueue::new(
            config.max_pending_batches,
            config.throw_on_queue_full,
        ));

        let buffers = PayloadType::ALL
            .iter()
            .map(|&payload| PayloadBuffer::new(payload, config.max_batch_bytes))
            .collect();

        let handle = tokio::spawn(run_sender(
            endpoint.name.clone(),
            endpoint.handler,
            Arc::clone(&queue),
            config.retry.clone(),
            Arc::clone(&callback),
        ));

        Arc::new(EndpointSender {
            name: endpoint.name,
            queue,
            buffers: Mutex::new(buffers),
            callback,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Endpoint name for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Batches discarded under the drop policy so far.
    pub fn dropped_total(&self) -> u64 {
        self.queue.dropped_total()
    }

    /// Serialize a reading into its payload buffer, cutting a batch to the
    /// queue when the size threshold is reached.
    pub fn enqueue_reading(&self, reading: &MetricReading) -> Result<()> {
        let full = {
            let mut buffers = self.buffers.lock();
            let buffer = buffers
                .iter_mut()
                .find(|b| b.payload() == PayloadType::from(reading.kind))
                .ok_or(TallyError::ChannelClosed)?;
            buffer.push(reading)?
        };
        match full {
            Some(batch) => self.submit(batch),
            None => Ok(()),
        }
    }

    /// Append a pre-serialized metadata document.
    pub fn enqueue_metadata(&self, body: &[u8]) -> Result<()> {
        let full = {
            let mut buffers = self.buffers.lock();
            let buffer = buffers
                .iter_mut()
                .find(|b| b.payload() == PayloadType::Metadata)
                .ok_or(TallyError::ChannelClosed)?;
            buffer.push_raw(body)
        };
        match full {
            Some(batch) => self.submit(batch),
            None => Ok(()),
        }
    }

    /// End-of-tick flush: every non-empty buffer becomes a batch. All
    /// buffers are flushed even if one enqueue fails; the first error is
    /// returned.
    pub fn flush_tick(&self) -> Result<()> {
        let batches: Vec<Batch> = {
            let mut buffers = self.buffers.lock();
            buffers.iter_mut().filter_map(|b| b.flush()).collect()
        };

        let mut first_err = None;
        for batch in batches {
            if let Err(e) = self.submit(batch) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn submit(&self, batch: Batch) -> Result<()> {
        let payload = batch.payload;
        match self.queue.push(batch)? {
            Enqueue::Queued => Ok(()),
            Enqueue::DroppedNewest => {
                let err = TallyError::QueueFull {
                    payload: payload.as_str(),
                    capacity: self.queue.capacity(),
                };
                tracing::warn!("Endpoint '{}' queue full, dropped newest batch", self.name);
                (self.callback)(&err);
                Ok(())
            },
        }
    }

    /// Flush remaining buffers, close the queue, and wait for the sender to
    /// drain, bounded by the timeout. Abandonment is reported through the
    /// callback, not returned as a fatal error.
    pub async fn drain(&self, timeout: Duration) {
        if let Err(e) = self.flush_tick() {
            (self.callback)(&e);
        }
        self.queue.close();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {
                    tracing::debug!("Endpoint '{}' drained cleanly", self.name);
                },
                Ok(Err(e)) => {
                    let err = TallyError::send(self.name.clone(), format!("sender task failed: {}", e));
                    (self.callback)(&err);
                },
                Err(_) => {
                    let err = TallyError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    };
                    tracing::warn!(
                        "Endpoint '{}' did not drain within {:?}; abandoning {} queued batches",
                        self.name,
                        timeout,
                        self.queue.len()
                    );
                    (self.callback)(&err);
                },
            }
        }
    }
}

async fn run_sender(
    name: String,
    handler: Arc<dyn crate::transport::MetricHandler>,
    queue: Arc<BatchQueue>,
    retry: RetryConfig,
    callback: ErrorCallback,
) {
    while let Some(batch) = queue.pop().await {
        let result = retry_with_config(&retry, || {
            handler.send(batch.payload, batch.body.clone())
        })
        .await;

        if let Err(e) = result {
            // Exhausted retries: the batch is dropped, but never silently.
            let err = TallyError::BatchDropped {
                endpoint: name.clone(),
                attempts: retry.max_attempts,
                message: e.to_string(),
            };
            tracing::warn!("{}", err);
            (callback)(&err);
        }
    }
    tracing::debug!("Sender for endpoint '{}' stopped", name);
}
