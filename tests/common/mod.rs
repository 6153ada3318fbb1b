//! Shared test support: in-memory handlers and callback recorders.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary; `RUST_LOG` controls
/// verbosity.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
use tally::core::{Result, TallyError};
use tally::transport::{ErrorCallback, MetricHandler, MetricReading, PayloadType};

/// Records every batch it receives, for later inspection.
pub struct CapturingHandler {
    batches: Mutex<Vec<(PayloadType, Bytes)>>,
}

impl CapturingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(CapturingHandler {
            batches: Mutex::new(Vec::new()),
        })
    }

    /// Decode every delivered reading of the given payload kind, in
    /// delivery order.
    pub fn readings(&self, payload: PayloadType) -> Vec<MetricReading> {
        self.batches
            .lock()
            .iter()
            .filter(|(p, _)| *p == payload)
            .flat_map(|(_, body)| {
                body.split(|b| *b == b'\n')
                    .filter(|line| !line.is_empty())
                    .map(|line| serde_json::from_slice(line).expect("valid reading JSON"))
                    .collect::<Vec<MetricReading>>()
            })
            .collect()
    }

    /// Raw metadata documents, one JSON value per emitted document.
    pub fn metadata_documents(&self) -> Vec<serde_json::Value> {
        self.batches
            .lock()
            .iter()
            .filter(|(p, _)| *p == PayloadType::Metadata)
            .flat_map(|(_, body)| {
                body.split(|b| *b == b'\n')
                    .filter(|line| !line.is_empty())
                    .map(|line| serde_json::from_slice(line).expect("valid metadata JSON"))
                    .collect::<Vec<serde_json::Value>>()
            })
            .collect()
    }

    pub fn batch_count(&self, payload: PayloadType) -> usize {
        self.batches
            .lock()
            .iter()
            .filter(|(p, _)| *p == payload)
            .count()
    }
}

#[async_trait]
impl MetricHandler for CapturingHandler {
    async fn send(&self, payload: PayloadType, body: Bytes) -> Result<()> {
        self.batches.lock().push((payload, body));
        Ok(())
    }
}

/// Fails the first `fail_first` sends with a recoverable error, then
/// delegates to an inner [`CapturingHandler`].
pub struct FlakyHandler {
    pub inner: Arc<CapturingHandler>,
    remaining_failures: AtomicU32,
    pub attempts: AtomicU32,
}

impl FlakyHandler {
    pub fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(FlakyHandler {
            inner: CapturingHandler::new(),
            remaining_failures: AtomicU32::new(fail_first),
            attempts: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl MetricHandler for FlakyHandler {
    async fn send(&self, payload: PayloadType, body: Bytes) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TallyError::send("flaky", "connection reset"));
        }
        self.inner.send(payload, body).await
    }
}

/// Never succeeds; every send reports a recoverable network error.
pub struct DownHandler {
    pub attempts: AtomicU32,
}

impl DownHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(DownHandler {
            attempts: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl MetricHandler for DownHandler {
    async fn send(&self, _payload: PayloadType, _body: Bytes) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TallyError::send("down", "connection refused"))
    }
}

/// Accepts the first send and then blocks for the rest of the test, so the
/// endpoint queue backs up behind it.
pub struct StalledHandler {
    pub inner: Arc<CapturingHandler>,
}

impl StalledHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(StalledHandler {
            inner: CapturingHandler::new(),
        })
    }
}

#[async_trait]
impl MetricHandler for StalledHandler {
    async fn send(&self, payload: PayloadType, body: Bytes) -> Result<()> {
        self.inner.send(payload, body).await?;
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// An error callback that records the category of every event it receives.
pub fn recording_callback() -> (ErrorCallback, Arc<Mutex<Vec<String>>>) {
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: ErrorCallback = Arc::new(move |e: &TallyError| {
        sink.lock().push(format!("{}: {}", e.category(), e));
    });
    (callback, events)
}
