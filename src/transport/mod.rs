//! Buffered, backpressured transport pipeline.
//!
//! Readings produced by the snapshot scheduler are serialized into
//! per-payload-kind batch buffers, queued per endpoint behind a bounded
//! queue, and shipped by one asynchronous sender task per endpoint. The
//! wire protocol itself lives behind the [`MetricHandler`] boundary; the
//! core never depends on a specific backend's schema.

use crate::core::{Result, TallyError};
use crate::instrument::{MetricKind, TagSet};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod buffer;
pub mod queue;
pub mod sender;

pub use queue::BatchQueue;
pub use sender::EndpointSender;

/// Callback receiving every non-fatal background failure.
pub type ErrorCallback = Arc<dyn Fn(&TallyError) + Send + Sync>;

/// The category of a batch, determining which queue/buffer it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// Per-interval delta counters
    Counter,
    /// Monotonic running totals
    CumulativeCounter,
    /// Gauge readings (including aggregated outputs)
    Gauge,
    /// Instrument metadata (names, units, descriptions)
    Metadata,
}

impl PayloadType {
    /// All payload types, in buffer order.
    pub const ALL: [PayloadType; 4] = [
        PayloadType::Counter,
        PayloadType::CumulativeCounter,
        PayloadType::Gauge,
        PayloadType::Metadata,
    ];

    /// Stable string form for logging and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadType::Counter => "counter",
            PayloadType::CumulativeCounter => "cumulative_counter",
            PayloadType::Gauge => "gauge",
            PayloadType::Metadata => "metadata",
        }
    }
}

impl From<MetricKind> for PayloadType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => PayloadType::Counter,
            MetricKind::CumulativeCounter => PayloadType::CumulativeCounter,
            MetricKind::Gauge => PayloadType::Gauge,
        }
    }
}

/// One serialized data point, produced fresh each interval and not retained
/// beyond hand-off to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// Kind of the producing instrument
    pub kind: MetricKind,
    /// Full metric name including any aggregation suffix
    pub name: String,
    /// Computed value
    pub value: f64,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Frozen tag set
    pub tags: TagSet,
}

/// A serialized batch annotated with its payload kind.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Which queue/buffer family this batch belongs to
    pub payload: PayloadType,
    /// Opaque wire bytes
    pub body: Bytes,
}

/// A named remote destination fed independently of the others.
#[derive(Clone)]
pub struct Endpoint {
    /// Operator-facing endpoint name, used in logs and errors
    pub name: String,
    /// Owns the wire protocol and the network transport
    pub handler: Arc<dyn MetricHandler>,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new<S: Into<String>>(name: S, handler: Arc<dyn MetricHandler>) -> Self {
        Endpoint {
            name: name.into(),
            handler,
        }
    }
}

/// External collaborator boundary: accepts a payload kind and a serialized
/// buffer, returns success/failure asynchronously.
#[async_trait]
pub trait MetricHandler: Send + Sync {
    /// Ship one batch. A recoverable error (see
    /// [`TallyError::is_recoverable`]) triggers the retry policy.
    async fn send(&self, payload: PayloadType, body: Bytes) -> Result<()>;
}
