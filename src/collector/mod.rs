//! The metrics collector: instrument ownership, attachment, scheduling, and
//! shutdown.
//!
//! A [`MetricsCollector`] owns the attachment registry, a strategy registry,
//! one snapshot scheduler task, and one transport pipeline per configured
//! endpoint. Instruments are created through the collector's typed
//! constructors, which validate identity, apply the configured name prefix
//! and default tags, and attach the instrument in one step.

use crate::core::{CollectorConfig, Result, TallyError};
use crate::instrument::{
    AggregateGauge, AggregationStrategy, Counter, CumulativeCounter, GaugeProfile, Instrument,
    MetricBuilder, MetricDescriptor, MetricKind, StrategyRegistry, TagSet,
};
use crate::transport::{Endpoint, EndpointSender, ErrorCallback, MetricHandler};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub(crate) mod registry;
pub(crate) mod scheduler;

use registry::AttachmentRegistry;
use scheduler::{SchedulerContext, SchedulerHandle};

/// Builder for [`MetricsCollector`].
pub struct CollectorBuilder {
    config: CollectorConfig,
    endpoints: Vec<Endpoint>,
    callback: Option<ErrorCallback>,
}

impl CollectorBuilder {
    /// Start with default configuration and no endpoints.
    pub fn new() -> Self {
        CollectorBuilder {
            config: CollectorConfig::default(),
            endpoints: Vec::new(),
            callback: None,
        }
    }

    /// Use the given configuration.
    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an endpoint fed independently of the others.
    pub fn endpoint<S: Into<String>>(mut self, name: S, handler: Arc<dyn MetricHandler>) -> Self {
        self.endpoints.push(Endpoint::new(name, handler));
        self
    }

    /// Install the callback receiving every non-fatal background failure.
    /// Defaults to logging through `tracing`.
    pub fn error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TallyError) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Validate the configuration and start the collector. Spawns the
    /// scheduler and sender tasks, so this must run within a tokio runtime.
    pub fn build(self) -> Result<MetricsCollector> {
        self.config.validate()?;

        let callback: ErrorCallback = self.callback.unwrap_or_else(|| {
            Arc::new(|e: &TallyError| {
                tracing::error!(category = e.category(), "Background metrics failure: {}", e);
            })
        });

        let senders: Vec<Arc<EndpointSender>> = self
            .endpoints
            .into_iter()
            .map(|endpoint| EndpointSender::spawn(endpoint, &self.config.transport, Arc::clone(&callback)))
            .collect();

        let registry = Arc::new(AttachmentRegistry::new());

        let handle = scheduler::spawn(Arc::new(SchedulerContext {
            config: self.config.clone(),
            registry: Arc::clone(&registry),
            senders: senders.clone(),
            callback: Arc::clone(&callback),
        }));

        tracing::info!(
            interval = ?self.config.snapshot_interval,
            endpoints = senders.len(),
            "Metrics collector started"
        );

        Ok(MetricsCollector {
            config: self.config,
            strategies: StrategyRegistry::new(),
            registry,
            senders,
            scheduler: Mutex::new(Some(handle)),
        })
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running metrics collector.
pub struct MetricsCollector {
    config: CollectorConfig,
    strategies: StrategyRegistry,
    registry: Arc<AttachmentRegistry>,
    senders: Vec<Arc<EndpointSender>>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl MetricsCollector {
    /// Start building a collector.
    pub fn builder() -> CollectorBuilder {
        CollectorBuilder::new()
    }

    /// The active configuration.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Number of attached instruments.
    pub fn instrument_count(&self) -> usize {
        self.registry.len()
    }

    /// Create and attach a per-interval delta counter.
    pub fn counter(&self, builder: MetricBuilder) -> Result<Arc<Counter>> {
        let frozen = self.freeze(&builder, MetricKind::Counter)?;
        let counter = Arc::new(Counter::new(
            frozen.name.clone(),
            frozen.unit.clone(),
            frozen.description.clone(),
        ));
        self.attach(counter.clone(), frozen)?;
        Ok(counter)
    }

    /// Create and attach a monotonic cumulative counter.
    pub fn cumulative_counter(&self, builder: MetricBuilder) -> Result<Arc<CumulativeCounter>> {
        let frozen = self.freeze(&builder, MetricKind::CumulativeCounter)?;
        let counter = Arc::new(CumulativeCounter::new(
            frozen.name.clone(),
            frozen.unit.clone(),
            frozen.description.clone(),
        ));
        self.attach(counter.clone(), frozen)?;
        Ok(counter)
    }

    /// Create and attach an aggregate gauge with an explicit strategy.
    pub fn gauge(
        &self,
        builder: MetricBuilder,
        strategy: AggregationStrategy,
    ) -> Result<Arc<AggregateGauge>> {
        let frozen = self.freeze(&builder, MetricKind::Gauge)?;
        let gauge = Arc::new(AggregateGauge::new(
            frozen.name.clone(),
            frozen.unit.clone(),
            frozen.description.clone(),
            Arc::new(strategy),
            builder.minimum_events,
        ));
        self.attach(gauge.clone(), frozen)?;
        Ok(gauge)
    }

    /// Create and attach an aggregate gauge whose strategy is resolved once
    /// per profile type and cached.
    pub fn gauge_for<P: GaugeProfile>(&self, builder: MetricBuilder) -> Result<Arc<AggregateGauge>> {
        let strategy = self.strategies.resolve::<P>()?;
        let frozen = self.freeze(&builder, MetricKind::Gauge)?;
        let minimum_events = builder.minimum_events.or_else(P::minimum_events);
        let gauge = Arc::new(AggregateGauge::new(
            frozen.name.clone(),
            frozen.unit.clone(),
            frozen.description.clone(),
            strategy,
            minimum_events,
        ));
        self.attach(gauge.clone(), frozen)?;
        Ok(gauge)
    }

    /// Freeze an instrument's identity: apply the name prefix, merge
    /// default tags (instrument tags win on key collisions), validate the
    /// charset, and sort the tag set.
    fn freeze(&self, builder: &MetricBuilder, kind: MetricKind) -> Result<MetricDescriptor> {
        let name = format!("{}{}", self.config.metrics_name_prefix, builder.name);
        crate::instrument::validate_name(&name)?;

        let mut tags: Vec<(String, String)> = self
            .config
            .default_tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &builder.tags {
            if builder.tags.iter().filter(|(k, _)| k == key).count() > 1 {
                return Err(TallyError::InvalidTag {
                    key: key.clone(),
                    reason: "duplicate tag key".to_string(),
                });
            }
            tags.retain(|(k, _)| k != key);
            tags.push((key.clone(), value.clone()));
        }
        for (key, value) in &tags {
            crate::instrument::validate_tag(key, value)?;
        }
        tags.sort();

        Ok(MetricDescriptor {
            name,
            unit: builder.unit.clone(),
            description: builder.description.clone(),
            tags: TagSet::from_vec(tags),
            kind,
        })
    }

    fn attach<T: Instrument + 'static>(&self, instrument: Arc<T>, frozen: MetricDescriptor) -> Result<()> {
        let key = frozen.key();
        let dynamic: Arc<dyn Instrument> = instrument.clone();
        self.registry.attach(key.clone(), Arc::clone(&dynamic))?;
        instrument.apply_defaults(self.config.minimum_events);
        if let Err(e) = instrument.core().attach(frozen) {
            self.registry.remove(&key, &dynamic);
            return Err(e);
        }
        Ok(())
    }

    /// Synchronously render every attached instrument's current live values
    /// to a text stream, independent of the periodic scheduler.
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for instrument in self.registry.instruments() {
            instrument.dump(out)?;
        }
        Ok(())
    }

    /// Stop the scheduler (which runs one final flush tick), detach every
    /// instrument, and drain the transport within the configured timeout.
    pub async fn shutdown(&self) {
        let handle = self.scheduler.lock().take();
        match handle {
            Some(handle) => handle.stop().await,
            None => return, // already shut down
        }

        for instrument in self.registry.detach_all() {
            instrument.core().detach();
        }

        let timeout = self.config.transport.shutdown_timeout;
        futures::future::join_all(self.senders.iter().map(|s| s.drain(timeout))).await;

        tracing::info!("Metrics collector shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigBuilder;
    use crate::instrument::AggregationMode;
    use crate::transport::PayloadType;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct NullHandler;

    #[async_trait]
    impl MetricHandler for NullHandler {
        async fn send(&self, _payload: PayloadType, _body: Bytes) -> Result<()> {
            Ok(())
        }
    }

    fn test_collector() -> MetricsCollector {
        let config = ConfigBuilder::new()
            .metrics_name_prefix("app.")
            .default_tag("host", "web-01")
            .build()
            .unwrap();
        MetricsCollector::builder()
            .config(config)
            .endpoint("null", Arc::new(NullHandler))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_prefix_and_default_tags_applied() {
        let collector = test_collector();
        let counter = collector
            .counter(MetricBuilder::new("requests").tag("route", "/api"))
            .unwrap();

        let descriptor = counter.core().descriptor();
        assert_eq!(descriptor.name, "app.requests");
        assert_eq!(
            descriptor.tags.as_slice(),
            &[
                ("host".to_string(), "web-01".to_string()),
                ("route".to_string(), "/api".to_string()),
            ]
        );
        collector.shutdown().await;
    }

    #[tokio::test]
    async fn test_instrument_tag_overrides_default() {
        let collector = test_collector();
        let counter = collector
            .counter(MetricBuilder::new("requests").tag("host", "db-02"))
            .unwrap();

        let descriptor = counter.core().descriptor();
        assert_eq!(
            descriptor.tags.as_slice(),
            &[("host".to_string(), "db-02".to_string())]
        );
        collector.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_metric_rejected() {
        let collector = test_collector();
        collector.counter(MetricBuilder::new("requests")).unwrap();
        let err = collector.counter(MetricBuilder::new("requests"));
        assert!(matches!(err, Err(TallyError::DuplicateMetric(_))));

        // Different tags make it a distinct instrument
        assert!(collector
            .counter(MetricBuilder::new("requests").tag("route", "/api"))
            .is_ok());
        collector.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let collector = test_collector();
        assert!(matches!(
            collector.counter(MetricBuilder::new("bad name")),
            Err(TallyError::InvalidName(_))
        ));
        assert_eq!(collector.instrument_count(), 0);
        collector.shutdown().await;
    }

    #[tokio::test]
    async fn test_dump_renders_all_instruments() {
        let collector = test_collector();
        let counter = collector.counter(MetricBuilder::new("requests")).unwrap();
        let gauge = collector
            .gauge(
                MetricBuilder::new("latency"),
                AggregationStrategy::builder()
                    .mode(AggregationMode::Average)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        counter.add(5).unwrap();
        gauge.record(2.0).unwrap();

        let mut out = String::new();
        collector.dump(&mut out).unwrap();
        assert!(out.contains("app.requests{host=web-01} counter pending=5"));
        assert!(out.contains("app.latency{host=web-01} gauge count=1 avg=2"));
        collector.shutdown().await;
    }

    #[tokio::test]
    async fn test_record_after_shutdown_fails() {
        let collector = test_collector();
        let counter = collector.counter(MetricBuilder::new("requests")).unwrap();
        counter.increment().unwrap();

        collector.shutdown().await;
        assert!(matches!(counter.increment(), Err(TallyError::NotAttached(_))));
    }

    struct LatencyProfile;

    impl GaugeProfile for LatencyProfile {
        fn strategy() -> Result<AggregationStrategy> {
            AggregationStrategy::builder()
                .mode(AggregationMode::Median)
                .mode(AggregationMode::Count)
                .build()
        }

        fn minimum_events() -> Option<u64> {
            Some(2)
        }
    }

    #[tokio::test]
    async fn test_gauge_profile_resolution() {
        let collector = test_collector();
        let a = collector
            .gauge_for::<LatencyProfile>(MetricBuilder::new("latency.get"))
            .unwrap();
        let b = collector
            .gauge_for::<LatencyProfile>(MetricBuilder::new("latency.put"))
            .unwrap();

        // Cached by type identity: both gauges share one resolved strategy
        assert!(std::ptr::eq(
            a.strategy() as *const _,
            b.strategy() as *const _
        ));
        collector.shutdown().await;
    }
}
