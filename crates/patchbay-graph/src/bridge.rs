//! Modulation output publishing and the audio-to-UI bridge.
//!
//! Every node owns a [`ModOutput`]: an atomic slot holding the last
//! published normalised value, plus an optional SPSC ring the audio
//! thread pushes `(value, run_length)` slots into. The UI side drains
//! the ring destructively. A full ring drops the newest slot and counts
//! the drop; the reader then simply sees stale data, never torn data.

use std::sync::atomic::{AtomicU64, Ordering};

use atomic_float::AtomicF64;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::error::NodeError;

/// Default tap capacity in slots.
pub const DEFAULT_TAP_CAPACITY: usize = 4096;

/// One ring entry: a value held for `run` samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModSlot {
    pub value: f64,
    pub run: u32,
}

/// Owned by each node; written from the render path.
#[derive(Debug, Default)]
pub struct ModOutput {
    last: AtomicF64,
    tap: Mutex<Option<Producer<ModSlot>>>,
    dropped: AtomicU64,
}

impl ModOutput {
    pub fn new() -> Self {
        Self {
            last: AtomicF64::new(0.0),
            tap: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Last published normalised value.
    #[inline]
    pub fn last(&self) -> f64 {
        self.last.load(Ordering::Acquire)
    }

    /// Publishes a value covering `run` samples. Called once per block
    /// (or per sub-block) by modulation-source processors.
    pub fn publish(&self, value: f64, run: u32) {
        self.last.store(value, Ordering::Release);
        if let Some(producer) = self.tap.lock().as_mut() {
            match producer.push(ModSlot { value, run }) {
                Ok(()) => {}
                Err(PushError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Slots dropped because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Attaches a reader with the given capacity. Only one tap may be
    /// attached at a time.
    pub fn attach_tap(&self, capacity: usize) -> Result<ModReader, NodeError> {
        let mut tap = self.tap.lock();
        if tap.is_some() {
            return Err(NodeError::RingBufferMultipleWriters);
        }
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        *tap = Some(producer);
        Ok(ModReader { consumer })
    }

    pub fn detach_tap(&self) {
        *self.tap.lock() = None;
    }

    pub fn has_tap(&self) -> bool {
        self.tap.lock().is_some()
    }
}

/// UI-side reader half of a tap.
pub struct ModReader {
    consumer: Consumer<ModSlot>,
}

impl ModReader {
    /// Slots waiting to be read.
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Drains every pending slot, expanding run lengths into
    /// per-sample values appended to `out`. Returns the number of
    /// samples written. The read consumes; a second call returns 0
    /// until the writer publishes again.
    pub fn read_into(&mut self, out: &mut Vec<f64>) -> usize {
        let mut written = 0;
        while let Ok(slot) = self.consumer.pop() {
            for _ in 0..slot.run.max(1) {
                out.push(slot.value);
            }
            written += slot.run.max(1) as usize;
        }
        written
    }

    /// Drains pending slots without expanding runs.
    pub fn read_slots(&mut self, out: &mut Vec<ModSlot>) -> usize {
        let mut count = 0;
        while let Ok(slot) = self.consumer.pop() {
            out.push(slot);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_updates_last_value() {
        let output = ModOutput::new();
        output.publish(0.25, 64);
        assert_eq!(output.last(), 0.25);
        assert_eq!(output.dropped(), 0);
    }

    #[test]
    fn tap_reads_are_destructive() {
        let output = ModOutput::new();
        let mut reader = output.attach_tap(8).unwrap();
        output.publish(0.5, 3);
        output.publish(1.0, 1);

        assert_eq!(reader.available(), 2);
        let mut samples = Vec::new();
        assert_eq!(reader.read_into(&mut samples), 4);
        assert_eq!(samples, vec![0.5, 0.5, 0.5, 1.0]);
        assert_eq!(reader.available(), 0);
        assert_eq!(reader.read_into(&mut samples), 0);
    }

    #[test]
    fn second_tap_is_refused() {
        let output = ModOutput::new();
        let _reader = output.attach_tap(8).unwrap();
        assert!(matches!(
            output.attach_tap(8),
            Err(NodeError::RingBufferMultipleWriters)
        ));
        output.detach_tap();
        assert!(output.attach_tap(8).is_ok());
    }

    #[test]
    fn full_ring_drops_and_counts() {
        let output = ModOutput::new();
        let mut reader = output.attach_tap(2).unwrap();
        output.publish(0.1, 1);
        output.publish(0.2, 1);
        output.publish(0.3, 1);
        assert_eq!(output.dropped(), 1);

        let mut slots = Vec::new();
        assert_eq!(reader.read_slots(&mut slots), 2);
        assert_eq!(slots[0].value, 0.1);
        // The newest value was the one dropped.
        assert_eq!(slots[1].value, 0.2);
    }
}
