//! The snapshot scheduler.
//!
//! One timer-driven task per collector. A tick captures every attached
//! instrument, serializes the snapshots into readings, and hands them to
//! each endpoint's transport. The tick body is synchronous, so ticks can
//! never overlap; recording continues concurrently on producer threads.

use crate::collector::registry::AttachmentRegistry;
use crate::core::CollectorConfig;
use crate::instrument::TagSet;
use crate::transport::{EndpointSender, ErrorCallback, MetricReading};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Everything a tick needs, shared with the scheduler task.
pub(crate) struct SchedulerContext {
    pub(crate) config: CollectorConfig,
    pub(crate) registry: Arc<AttachmentRegistry>,
    pub(crate) senders: Vec<Arc<EndpointSender>>,
    pub(crate) callback: ErrorCallback,
}

/// Handle used to stop the scheduler task.
pub(crate) struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop starting new ticks, wait for the in-flight tick, and run one
    /// final flush tick.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Scheduler task ended abnormally: {}", e);
        }
    }
}

/// Spawn the scheduler task. Must be called within a tokio runtime.
pub(crate) fn spawn(ctx: Arc<SchedulerContext>) -> SchedulerHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(ctx.config.snapshot_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval fires immediately; consume that so the first real
        // tick lands one period after startup.
        ticker.tick().await;

        let mut metadata = MetadataTracker::new(ctx.config.transport.metadata_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_tick(&ctx, &mut metadata);
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                },
            }
        }

        // Final flush tick so values recorded since the last tick still
        // ship before detachment.
        run_tick(&ctx, &mut metadata);
        tracing::debug!("Snapshot scheduler stopped");
    });

    SchedulerHandle { shutdown, task }
}

/// Decides when instrument metadata is (re-)emitted: on the first tick,
/// when the attached set changes, and on the configured interval.
struct MetadataTracker {
    interval: Duration,
    last_sent: Option<Instant>,
    last_generation: u64,
}

impl MetadataTracker {
    fn new(interval: Duration) -> Self {
        MetadataTracker {
            interval,
            last_sent: None,
            last_generation: 0,
        }
    }

    fn due(&self, generation: u64) -> bool {
        match self.last_sent {
            None => true,
            Some(at) => generation != self.last_generation || at.elapsed() >= self.interval,
        }
    }

    fn mark_sent(&mut self, generation: u64) {
        self.last_sent = Some(Instant::now());
        self.last_generation = generation;
    }
}

#[derive(Serialize)]
struct MetadataDocument<'a> {
    name: &'a str,
    kind: &'static str,
    unit: &'a str,
    description: &'a str,
    tags: &'a TagSet,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One snapshot pass: capture, serialize, route, flush.
fn run_tick(ctx: &SchedulerContext, metadata: &mut MetadataTracker) {
    let instruments = ctx.registry.instruments();
    let generation = ctx.registry.generation();
    let timestamp = unix_now();

    let mut readings: Vec<MetricReading> = Vec::new();
    let mut scratch: Vec<MetricReading> = Vec::new();

    // Capture is a separate pass of fast scalar swaps, so every snapshot is
    // taken back-to-back before any serialization work widens the window.
    for instrument in &instruments {
        instrument.capture();
    }

    for instrument in &instruments {
        // A failing instrument contributes nothing this interval; the tick
        // continues for the others.
        scratch.clear();
        match instrument.serialize(&mut scratch, timestamp) {
            Ok(()) => readings.append(&mut scratch),
            Err(e) => {
                tracing::warn!(
                    "Instrument '{}' failed to serialize: {}",
                    instrument.core().descriptor().name,
                    e
                );
                (ctx.callback)(&e);
            },
        }
    }

    for sender in &ctx.senders {
        for reading in &readings {
            if let Err(e) = sender.enqueue_reading(reading) {
                (ctx.callback)(&e);
            }
        }
    }

    if metadata.due(generation) && !instruments.is_empty() {
        emit_metadata(ctx, &instruments);
        metadata.mark_sent(generation);
    }

    for sender in &ctx.senders {
        if let Err(e) = sender.flush_tick() {
            (ctx.callback)(&e);
        }
    }

    tracing::trace!(
        instruments = instruments.len(),
        readings = readings.len(),
        "Snapshot tick complete"
    );
}

fn emit_metadata(ctx: &SchedulerContext, instruments: &[Arc<dyn crate::instrument::Instrument>]) {
    for instrument in instruments {
        let descriptor = instrument.core().descriptor();
        let doc = MetadataDocument {
            name: &descriptor.name,
            kind: descriptor.kind.as_str(),
            unit: &descriptor.unit,
            description: &descriptor.description,
            tags: &descriptor.tags,
        };
        let body = match serde_json::to_vec(&doc) {
            Ok(body) => body,
            Err(e) => {
                (ctx.callback)(&e.into());
                continue;
            },
        };
        for sender in &ctx.senders {
            if let Err(e) = sender.enqueue_metadata(&body) {
                (ctx.callback)(&e);
            }
        }
    }
}
