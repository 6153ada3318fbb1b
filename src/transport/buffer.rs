//! Per-payload-kind batch buffers.
//!
//! Readings are serialized as JSON lines into a growable byte buffer; the
//! buffer is cut into a [`Batch`] when it reaches the size threshold or at
//! the end of a scheduler tick, whichever comes first.

use crate::core::Result;
use crate::transport::{Batch, MetricReading, PayloadType};
use bytes::{BufMut, BytesMut};

/// Accumulates serialized readings for one payload kind.
pub(crate) struct PayloadBuffer {
    payload: PayloadType,
    buf: BytesMut,
    max_bytes: usize,
}

impl PayloadBuffer {
    pub(crate) fn new(payload: PayloadType, max_bytes: usize) -> Self {
        PayloadBuffer {
            payload,
            buf: BytesMut::with_capacity(max_bytes.min(4096)),
            max_bytes,
        }
    }

    pub(crate) fn payload(&self) -> PayloadType {
        self.payload
    }

    /// Append one reading. Returns a full batch when the size threshold is
    /// reached.
    pub(crate) fn push(&mut self, reading: &MetricReading) -> Result<Option<Batch>> {
        let line = serde_json::to_vec(reading)?;
        self.buf.reserve(line.len() + 1);
        self.buf.put_slice(&line);
        self.buf.put_u8(b'\n');

        if self.buf.len() >= self.max_bytes {
            Ok(self.flush())
        } else {
            Ok(None)
        }
    }

    /// Append pre-serialized bytes (metadata documents).
    pub(crate) fn push_raw(&mut self, body: &[u8]) -> Option<Batch> {
        self.buf.reserve(body.len() + 1);
        self.buf.put_slice(body);
        self.buf.put_u8(b'\n');

        if self.buf.len() >= self.max_bytes {
            self.flush()
        } else {
            None
        }
    }

    /// Cut whatever has accumulated into a batch, if anything.
    pub(crate) fn flush(&mut self) -> Option<Batch> {
        if self.buf.is_empty() {
            return None;
        }
        Some(Batch {
            payload: self.payload,
            body: self.buf.split().freeze(),
        })
    }
}
