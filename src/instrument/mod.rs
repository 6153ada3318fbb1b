//! Metric instruments and their lifecycle.
//!
//! An instrument is a named, tagged metric object that values are recorded
//! into. Instruments move through a strict lifecycle: Created at
//! construction, Attached once a collector accepts them (which freezes the
//! tag set), Detached at collector shutdown. Recording into an instrument
//! that is not attached fails with [`TallyError::NotAttached`].
//!
//! The scheduler drives instruments through a two-phase serialization
//! contract: [`Instrument::capture`] swaps live state into an interval
//! snapshot, then [`Instrument::serialize`] turns the snapshot into
//! [`MetricReading`]s.

use crate::core::{Result, TallyError};
use crate::transport::MetricReading;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

pub mod counter;
pub mod gauge;
pub mod strategy;

pub use counter::{Counter, CumulativeCounter};
pub use gauge::AggregateGauge;
pub use strategy::{AggregationMode, AggregationStrategy, GaugeProfile, StrategyRegistry};

/// Ordered tag set. Kept sorted by key so equal tag sets compare equal.
pub type TagSet = SmallVec<[(String, String); 4]>;

/// The kind of a metric instrument, which determines its payload routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Per-interval delta counter, reset on every snapshot
    Counter,
    /// Monotonic counter reporting its running total
    CumulativeCounter,
    /// Point-in-time or statistically aggregated measurement
    Gauge,
}

impl MetricKind {
    /// Stable string form used in wire payloads and dump output
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::CumulativeCounter => "cumulative_counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// Returns true when every character is alphanumeric or one of `-_./`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

/// Validate a metric name against the restricted charset.
pub fn validate_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(TallyError::InvalidName(name.to_string()))
    }
}

/// Validate a tag key and value against the restricted charset.
pub fn validate_tag(key: &str, value: &str) -> Result<()> {
    if !is_valid_name(key) {
        return Err(TallyError::InvalidTag {
            key: key.to_string(),
            reason: "key must be non-empty alphanumeric or '-_./'".to_string(),
        });
    }
    if !is_valid_name(value) {
        return Err(TallyError::InvalidTag {
            key: key.to_string(),
            reason: format!("value '{}' must be non-empty alphanumeric or '-_./'", value),
        });
    }
    Ok(())
}

/// Frozen identity of an attached instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    /// Full metric name (collector prefix already applied)
    pub name: String,
    /// Unit of measurement, free-form (e.g. "milliseconds")
    pub unit: String,
    /// Human description, shipped as metadata
    pub description: String,
    /// Sorted tag set
    pub tags: TagSet,
    /// Instrument kind
    pub kind: MetricKind,
}

impl MetricDescriptor {
    /// Registry key: name plus tags identify an instrument uniquely.
    pub(crate) fn key(&self) -> (String, TagSet) {
        (self.name.clone(), self.tags.clone())
    }

    pub(crate) fn write_identity(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{}", self.name)?;
        if !self.tags.is_empty() {
            out.write_char('{')?;
            for (i, (k, v)) in self.tags.iter().enumerate() {
                if i > 0 {
                    out.write_char(',')?;
                }
                write!(out, "{}={}", k, v)?;
            }
            out.write_char('}')?;
        }
        Ok(())
    }
}

/// Builder for instrument identity, handed to the collector's creation
/// methods. Charset validation happens when the collector attaches the
/// instrument, together with prefixing and default-tag merging.
#[derive(Debug, Clone, Default)]
pub struct MetricBuilder {
    pub(crate) name: String,
    pub(crate) unit: String,
    pub(crate) description: String,
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) minimum_events: Option<u64>,
}

impl MetricBuilder {
    /// Start building a metric with the given base name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        MetricBuilder {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the unit of measurement.
    pub fn unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the description shipped as metadata.
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Add a tag. Duplicate keys are rejected at attachment.
    pub fn tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Override the collector's minimum-events threshold for this
    /// instrument. Only meaningful for aggregate gauges.
    pub fn minimum_events(mut self, count: u64) -> Self {
        self.minimum_events = Some(count);
        self
    }
}

const STATE_CREATED: u8 = 0;
const STATE_ATTACHED: u8 = 1;
const STATE_DETACHED: u8 = 2;

/// Lifecycle state of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet owned by a collector
    Created,
    /// Owned by a collector, tags frozen, visited by the scheduler
    Attached,
    /// Terminal: removed at collector shutdown
    Detached,
}

/// Identity and lifecycle shared by every instrument type.
///
/// The hot path only touches the state atomic; the descriptor mutex is taken
/// at attachment and by the scheduler/dump paths.
pub struct MetricCore {
    descriptor: Mutex<MetricDescriptor>,
    state: AtomicU8,
}

impl MetricCore {
    pub(crate) fn new(name: String, unit: String, description: String, kind: MetricKind) -> Self {
        MetricCore {
            descriptor: Mutex::new(MetricDescriptor {
                name,
                unit,
                description,
                tags: TagSet::new(),
                kind,
            }),
            state: AtomicU8::new(STATE_CREATED),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            STATE_CREATED => LifecycleState::Created,
            STATE_ATTACHED => LifecycleState::Attached,
            _ => LifecycleState::Detached,
        }
    }

    /// Clone of the (possibly not yet frozen) descriptor.
    pub fn descriptor(&self) -> MetricDescriptor {
        self.descriptor.lock().clone()
    }

    /// Fails with `NotAttached` unless the instrument is live.
    pub(crate) fn ensure_attached(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) == STATE_ATTACHED {
            Ok(())
        } else {
            Err(TallyError::NotAttached(self.descriptor.lock().name.clone()))
        }
    }

    /// Freeze the descriptor and transition Created -> Attached.
    pub(crate) fn attach(&self, frozen: MetricDescriptor) -> Result<()> {
        match self.state.compare_exchange(
            STATE_CREATED,
            STATE_ATTACHED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                *self.descriptor.lock() = frozen;
                Ok(())
            },
            Err(_) => Err(TallyError::AlreadyAttached(self.descriptor.lock().name.clone())),
        }
    }

    /// Transition to the terminal Detached state.
    pub(crate) fn detach(&self) {
        self.state.store(STATE_DETACHED, Ordering::Release);
    }
}

/// The contract the snapshot scheduler drives.
///
/// `capture` is invoked once per tick, never concurrently with itself; it
/// must only swap scalar state under the instrument's own lock and never
/// perform I/O. `serialize` turns the captured snapshot into readings.
pub trait Instrument: Send + Sync {
    /// Shared identity and lifecycle.
    fn core(&self) -> &MetricCore;

    /// Swap live accumulator state into an interval snapshot.
    fn capture(&self);

    /// Emit readings from the last captured snapshot.
    fn serialize(&self, out: &mut Vec<MetricReading>, timestamp: u64) -> Result<()>;

    /// Pick up collector-wide defaults at attachment. Default: no-op.
    fn apply_defaults(&self, _minimum_events: u64) {}

    /// Render current live values for the diagnostics dump.
    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result;
}
