//! Attachment registry: the set of live instruments owned by a collector.

use crate::core::{Result, TallyError};
use crate::instrument::{Instrument, TagSet};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Registry key: full name plus frozen tags.
pub(crate) type InstrumentKey = (String, TagSet);

struct Inner {
    keys: HashSet<InstrumentKey>,
    instruments: Vec<Arc<dyn Instrument>>,
    /// Bumped on every attach; lets the scheduler notice membership changes.
    generation: u64,
}

/// Tracks attached instruments and enforces name/tag uniqueness.
///
/// Mutated only at attach and shutdown; read once per tick to get a stable
/// enumeration, so attachments during a tick land on the next one.
pub(crate) struct AttachmentRegistry {
    inner: Mutex<Inner>,
}

impl AttachmentRegistry {
    pub(crate) fn new() -> Self {
        AttachmentRegistry {
            inner: Mutex::new(Inner {
                keys: HashSet::new(),
                instruments: Vec::new(),
                generation: 0,
            }),
        }
    }

    /// Register an instrument under its frozen identity. Fails with
    /// `DuplicateMetric` when the same name+tags is already attached.
    pub(crate) fn attach(&self, key: InstrumentKey, instrument: Arc<dyn Instrument>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.keys.contains(&key) {
            return Err(TallyError::DuplicateMetric(key.0));
        }
        inner.keys.insert(key);
        inner.instruments.push(instrument);
        inner.generation += 1;
        Ok(())
    }

    /// Remove a reservation after a failed attachment.
    pub(crate) fn remove(&self, key: &InstrumentKey, instrument: &Arc<dyn Instrument>) {
        let mut inner = self.inner.lock();
        if inner.keys.remove(key) {
            inner.instruments.retain(|i| !Arc::ptr_eq(i, instrument));
        }
    }

    /// Stable snapshot of the attached instruments for one tick.
    pub(crate) fn instruments(&self) -> Vec<Arc<dyn Instrument>> {
        self.inner.lock().instruments.clone()
    }

    /// Current membership generation.
    pub(crate) fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Number of attached instruments.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().instruments.len()
    }

    /// Drain every instrument at shutdown.
    pub(crate) fn detach_all(&self) -> Vec<Arc<dyn Instrument>> {
        let mut inner = self.inner.lock();
        inner.keys.clear();
        inner.generation += 1;
        std::mem::take(&mut inner.instruments)
    }
}
