//! The statistical aggregate gauge.
//!
//! An [`AggregateGauge`] records raw values from arbitrary threads and, once
//! per reporting interval, reduces them into the outputs its
//! [`AggregationStrategy`] configures. Recording and snapshot capture share
//! one mutex so the accumulator swap is the sole synchronization point
//! between producers and the scheduler: every recorded value lands in
//! exactly one snapshot.

use crate::core::Result;
use crate::instrument::strategy::{AggregationMode, AggregationStrategy};
use crate::instrument::{Instrument, MetricCore, MetricKind};
use crate::transport::MetricReading;
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Mutable per-interval accumulator.
struct RecordBuffer {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
    /// Raw values, allocated only when a percentile mode is configured.
    values: Option<Vec<f64>>,
}

impl RecordBuffer {
    fn fresh(track_raw: bool) -> Self {
        RecordBuffer {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: 0.0,
            values: track_raw.then(Vec::new),
        }
    }
}

/// Whether an interval's snapshot reports everything, only the count, or
/// nothing. Count modes keep reporting below the minimum-events threshold
/// so consumers can distinguish "no events" from "below threshold".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportMode {
    None,
    CountOnly,
    All,
}

/// Immutable point-in-time reduction of one interval.
struct GaugeSnapshot {
    mode: ReportMode,
    count: u64,
    /// One computed value per configured mode, valid when `mode == All`.
    values: Vec<f64>,
}

/// Nearest-rank selection: `sorted[round(p * (n-1))]`. Deliberately not
/// interpolated; downstream consumers depend on this exact formula.
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Multi-mode statistical gauge.
pub struct AggregateGauge {
    core: MetricCore,
    strategy: Arc<AggregationStrategy>,
    minimum_events_override: Option<u64>,
    effective_minimum_events: AtomicU64,
    live: Mutex<RecordBuffer>,
    snapshot: Mutex<Option<GaugeSnapshot>>,
}

impl AggregateGauge {
    pub(crate) fn new(
        name: String,
        unit: String,
        description: String,
        strategy: Arc<AggregationStrategy>,
        minimum_events_override: Option<u64>,
    ) -> Self {
        let live = Mutex::new(RecordBuffer::fresh(strategy.track_raw()));
        AggregateGauge {
            core: MetricCore::new(name, unit, description, MetricKind::Gauge),
            effective_minimum_events: AtomicU64::new(minimum_events_override.unwrap_or(1)),
            minimum_events_override,
            strategy,
            live,
            snapshot: Mutex::new(None),
        }
    }

    /// The gauge's aggregation strategy.
    pub fn strategy(&self) -> &AggregationStrategy {
        &self.strategy
    }

    /// Record a value.
    ///
    /// Contends only on this instrument's mutex for a few scalar updates;
    /// never blocks on I/O. Fails with `NotAttached` before attachment.
    pub fn record(&self, value: f64) -> Result<()> {
        self.core.ensure_attached()?;
        let mut buf = self.live.lock();
        buf.count += 1;
        if self.strategy.track_mean() {
            buf.sum += value;
        }
        if self.strategy.track_last() {
            buf.last = value;
        }
        if self.strategy.scalar_min_max() {
            buf.min = buf.min.min(value);
            buf.max = buf.max.max(value);
        }
        if let Some(values) = buf.values.as_mut() {
            values.push(value);
        }
        Ok(())
    }

    /// Values recorded so far in the current interval.
    pub fn pending_count(&self) -> u64 {
        self.live.lock().count
    }

    /// Reduce a captured buffer into a snapshot. Returns the raw-value list
    /// when it qualifies for reuse next interval.
    fn reduce(&self, mut buf: RecordBuffer) -> (GaugeSnapshot, Option<Vec<f64>>) {
        let minimum_events = self.effective_minimum_events.load(Ordering::Relaxed);
        let report_all = buf.count > 0 && buf.count >= minimum_events;

        let mode = if report_all {
            ReportMode::All
        } else if self.strategy.has_count() {
            ReportMode::CountOnly
        } else {
            ReportMode::None
        };

        let mut sorted = buf.values.take();
        let mut values = Vec::new();

        if mode == ReportMode::All {
            if let Some(v) = sorted.as_mut() {
                v.sort_unstable_by(f64::total_cmp);
            }
            values.reserve_exact(self.strategy.modes().len());
            for (m, _) in self.strategy.modes() {
                let value = match (m, sorted.as_deref()) {
                    (AggregationMode::Average, _) => buf.sum / buf.count as f64,
                    (AggregationMode::Median, Some(v)) => nearest_rank(v, 0.5),
                    (AggregationMode::Percentile(p), Some(v)) => nearest_rank(v, *p),
                    (AggregationMode::Max, Some(v)) => v[v.len() - 1],
                    (AggregationMode::Min, Some(v)) => v[0],
                    (AggregationMode::Max, None) => buf.max,
                    (AggregationMode::Min, None) => buf.min,
                    (AggregationMode::Last, _) => buf.last,
                    (AggregationMode::Count, _) => buf.count as f64,
                    // A percentile mode implies the list was allocated.
                    (_, None) => f64::NAN,
                };
                values.push(value);
            }
        }

        // A list that was at least half utilized is worth keeping for the
        // next interval; a sparse one is discarded to give memory back.
        let recycled = sorted.and_then(|mut v| {
            if v.len() * 2 >= v.capacity() {
                v.clear();
                Some(v)
            } else {
                None
            }
        });

        (
            GaugeSnapshot {
                mode,
                count: buf.count,
                values,
            },
            recycled,
        )
    }
}

impl Instrument for AggregateGauge {
    fn core(&self) -> &MetricCore {
        &self.core
    }

    fn apply_defaults(&self, minimum_events: u64) {
        let effective = self.minimum_events_override.unwrap_or(minimum_events);
        self.effective_minimum_events.store(effective, Ordering::Relaxed);
    }

    fn capture(&self) {
        let captured = {
            let mut live = self.live.lock();
            mem::replace(&mut *live, RecordBuffer::fresh(self.strategy.track_raw()))
        };

        // Reduction happens outside the record lock.
        let (snapshot, recycled) = self.reduce(captured);

        if let Some(vec) = recycled {
            let mut live = self.live.lock();
            if let Some(values) = live.values.as_mut() {
                // Only hand the list back if recording hasn't started a
                // fresh one already.
                if values.is_empty() {
                    *values = vec;
                }
            }
        }

        *self.snapshot.lock() = Some(snapshot);
    }

    fn serialize(&self, out: &mut Vec<MetricReading>, timestamp: u64) -> Result<()> {
        let snapshot = match self.snapshot.lock().take() {
            Some(snapshot) => snapshot,
            None => return Ok(()),
        };
        if snapshot.mode == ReportMode::None {
            return Ok(());
        }

        let descriptor = self.core.descriptor();
        for (i, (mode, suffix)) in self.strategy.modes().iter().enumerate() {
            let value = match snapshot.mode {
                ReportMode::All => snapshot.values[i],
                ReportMode::CountOnly => {
                    if !matches!(mode, AggregationMode::Count) {
                        continue;
                    }
                    snapshot.count as f64
                },
                ReportMode::None => unreachable!(),
            };
            let name = if suffix.is_empty() {
                descriptor.name.clone()
            } else {
                format!("{}_{}", descriptor.name, suffix)
            };
            out.push(MetricReading {
                kind: MetricKind::Gauge,
                name,
                value,
                timestamp,
                tags: descriptor.tags.clone(),
            });
        }
        Ok(())
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let descriptor = self.core.descriptor();
        descriptor.write_identity(out)?;
        let buf = self.live.lock();
        write!(out, " gauge count={}", buf.count)?;
        if buf.count > 0 {
            if self.strategy.track_mean() {
                write!(out, " avg={}", buf.sum / buf.count as f64)?;
            }
            if self.strategy.scalar_min_max() {
                write!(out, " min={} max={}", buf.min, buf.max)?;
            }
            if self.strategy.track_last() {
                write!(out, " last={}", buf.last)?;
            }
        }
        writeln!(out)
    }
}
