//! Tally - client-side metrics instrumentation and reporting.
//!
//! Applications create typed metric instruments (counters, cumulative
//! counters, statistical aggregate gauges), record values from arbitrary
//! threads, and a per-collector scheduler periodically snapshots, serializes,
//! and ships the accumulated data to one or more remote endpoints, surviving
//! transient outages without losing or double-counting data.
//!
//! # Features
//!
//! - **Statistical aggregation**: min/max/avg/median/percentile/count/last
//!   per gauge, configured once and computed per reporting interval
//! - **Low-contention recording**: producers only touch one instrument's
//!   lock or atomics, never I/O
//! - **Buffered transport**: per-payload-kind batching, bounded queues with
//!   a configurable overflow policy, retrying asynchronous senders
//! - **Pluggable backends**: the wire protocol lives behind the
//!   [`MetricHandler`] trait; the core never depends on a backend's schema
//!
//! # Architecture
//!
//! - `core`: error, configuration, and retry plumbing
//! - `instrument`: metric instruments, lifecycle, aggregation strategies
//! - `collector`: attachment registry and the snapshot scheduler
//! - `transport`: batching, backpressure, and sending
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tally::{
//!     AggregationMode, AggregationStrategy, CollectorBuilder, MetricBuilder, MetricHandler,
//!     PayloadType, Result,
//! };
//!
//! struct StdoutHandler;
//!
//! #[async_trait::async_trait]
//! impl MetricHandler for StdoutHandler {
//!     async fn send(&self, payload: PayloadType, body: Bytes) -> Result<()> {
//!         println!("{}: {} bytes", payload.as_str(), body.len());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let collector = CollectorBuilder::new()
//!         .endpoint("stdout", Arc::new(StdoutHandler))
//!         .build()?;
//!
//!     let latency = collector.gauge(
//!         MetricBuilder::new("request.latency").unit("milliseconds"),
//!         AggregationStrategy::builder()
//!             .mode(AggregationMode::Average)
//!             .mode(AggregationMode::Percentile(0.99))
//!             .mode(AggregationMode::Count)
//!             .build()?,
//!     )?;
//!
//!     latency.record(12.5)?;
//!     collector.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod collector;
pub mod core;
pub mod instrument;
pub mod transport;

// Re-export the public surface for convenience
pub use crate::collector::{CollectorBuilder, MetricsCollector};
pub use crate::core::{CollectorConfig, ConfigBuilder, Result, RetryConfig, TallyError};
pub use crate::instrument::{
    AggregateGauge, AggregationMode, AggregationStrategy, Counter, CumulativeCounter,
    GaugeProfile, MetricBuilder, MetricKind,
};
pub use crate::transport::{Endpoint, ErrorCallback, MetricHandler, MetricReading, PayloadType};
