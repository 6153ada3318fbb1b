//! Counter instruments.
//!
//! Two flavors: [`Counter`] reports the per-interval delta and resets on
//! every snapshot; [`CumulativeCounter`] only ever grows and reports its
//! running total each interval.

use crate::core::Result;
use crate::instrument::{Instrument, MetricCore, MetricKind};
use crate::transport::MetricReading;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-interval delta counter.
///
/// Increments are lock-free; the snapshot atomically swaps the accumulated
/// delta for zero, so no increment is lost or counted twice.
pub struct Counter {
    core: MetricCore,
    value: AtomicU64,
    snapshot: AtomicU64,
}

impl Counter {
    pub(crate) fn new(name: String, unit: String, description: String) -> Self {
        Counter {
            core: MetricCore::new(name, unit, description, MetricKind::Counter),
            value: AtomicU64::new(0),
            snapshot: AtomicU64::new(0),
        }
    }

    /// Increment by one.
    pub fn increment(&self) -> Result<()> {
        self.add(1)
    }

    /// Increment by an arbitrary amount.
    pub fn add(&self, amount: u64) -> Result<()> {
        self.core.ensure_attached()?;
        self.value.fetch_add(amount, Ordering::Relaxed);
        Ok(())
    }

    /// Accumulated delta not yet snapshotted.
    pub fn pending(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Instrument for Counter {
    fn core(&self) -> &MetricCore {
        &self.core
    }

    fn capture(&self) {
        let delta = self.value.swap(0, Ordering::AcqRel);
        self.snapshot.store(delta, Ordering::Release);
    }

    fn serialize(&self, out: &mut Vec<MetricReading>, timestamp: u64) -> Result<()> {
        let delta = self.snapshot.swap(0, Ordering::AcqRel);
        if delta == 0 {
            return Ok(());
        }
        let descriptor = self.core.descriptor();
        out.push(MetricReading {
            kind: MetricKind::Counter,
            name: descriptor.name,
            value: delta as f64,
            timestamp,
            tags: descriptor.tags,
        });
        Ok(())
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let descriptor = self.core.descriptor();
        descriptor.write_identity(out)?;
        writeln!(out, " counter pending={}", self.pending())
    }
}

/// Monotonic counter reporting its running total.
pub struct CumulativeCounter {
    core: MetricCore,
    value: AtomicU64,
    touched: AtomicBool,
    snapshot: AtomicU64,
    snapshot_live: AtomicBool,
}

impl CumulativeCounter {
    pub(crate) fn new(name: String, unit: String, description: String) -> Self {
        CumulativeCounter {
            core: MetricCore::new(name, unit, description, MetricKind::CumulativeCounter),
            value: AtomicU64::new(0),
            touched: AtomicBool::new(false),
            snapshot: AtomicU64::new(0),
            snapshot_live: AtomicBool::new(false),
        }
    }

    /// Increment by one.
    pub fn increment(&self) -> Result<()> {
        self.add(1)
    }

    /// Increment by an arbitrary amount.
    pub fn add(&self, amount: u64) -> Result<()> {
        self.core.ensure_attached()?;
        self.value.fetch_add(amount, Ordering::Relaxed);
        self.touched.store(true, Ordering::Release);
        Ok(())
    }

    /// Current running total.
    pub fn total(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Instrument for CumulativeCounter {
    fn core(&self) -> &MetricCore {
        &self.core
    }

    fn capture(&self) {
        // Emit every interval once the counter has been incremented at
        // least once, so the remote series stays continuous.
        let live = self.touched.load(Ordering::Acquire);
        self.snapshot_live.store(live, Ordering::Release);
        if live {
            self.snapshot.store(self.value.load(Ordering::Acquire), Ordering::Release);
        }
    }

    fn serialize(&self, out: &mut Vec<MetricReading>, timestamp: u64) -> Result<()> {
        if !self.snapshot_live.load(Ordering::Acquire) {
            return Ok(());
        }
        let descriptor = self.core.descriptor();
        out.push(MetricReading {
            kind: MetricKind::CumulativeCounter,
            name: descriptor.name,
            value: self.snapshot.load(Ordering::Acquire) as f64,
            timestamp,
            tags: descriptor.tags,
        });
        Ok(())
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let descriptor = self.core.descriptor();
        descriptor.write_identity(out)?;
        writeln!(out, " cumulative_counter total={}", self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TallyError;

    fn attached_counter() -> Counter {
        let counter = Counter::new("requests".to_string(), String::new(), String::new());
        let frozen = counter.core.descriptor();
        counter.core.attach(frozen).unwrap();
        counter
    }

    #[test]
    fn test_record_before_attach_fails() {
        let counter = Counter::new("requests".to_string(), String::new(), String::new());
        assert!(matches!(counter.increment(), Err(TallyError::NotAttached(_))));
    }

    #[test]
    fn test_counter_delta_resets_on_capture() {
        let counter = attached_counter();
        counter.add(3).unwrap();
        counter.increment().unwrap();

        counter.capture();
        let mut out = Vec::new();
        counter.serialize(&mut out, 1_700_000_000).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 4.0);
        assert_eq!(out[0].name, "requests");

        // Nothing recorded since the swap: next interval emits nothing
        counter.capture();
        let mut out = Vec::new();
        counter.serialize(&mut out, 1_700_000_060).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_cumulative_counter_keeps_total() {
        let counter =
            CumulativeCounter::new("started".to_string(), String::new(), String::new());
        let frozen = counter.core.descriptor();
        counter.core.attach(frozen).unwrap();

        // Never incremented: silent
        counter.capture();
        let mut out = Vec::new();
        counter.serialize(&mut out, 0).unwrap();
        assert!(out.is_empty());

        counter.add(2).unwrap();
        counter.capture();
        counter.serialize(&mut out, 1).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 2.0);

        // Quiet interval still reports the running total
        counter.capture();
        counter.serialize(&mut out, 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].value, 2.0);
    }
}
