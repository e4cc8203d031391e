//! Lock-free single-producer / single-consumer ring buffer for `i16` samples.
//!
//! This is the hand-off point between the generator thread and the real-time playback
//! driver:
//! - generator thread → [`RingProducer::push`] (never blocks, drops what does not fit)
//! - playback driver → [`RingConsumer::pop_exact`] (never blocks, zero-fills any shortfall)
//!
//! ## Design
//! - **Split halves**: [`ring_buffer`] returns a producer and a consumer. Neither half is
//!   `Clone` and both mutate through `&mut self`, so the single-writer discipline for each
//!   cursor is enforced by ownership rather than by convention.
//! - **Cursors** are monotonic modulo `2 * capacity`. Keeping the wrap point a multiple of
//!   the capacity lets any capacity (not only powers of two) index slots with a plain `%`,
//!   while `write == read` (empty) stays distinguishable from `write - read == capacity` (full).
//! - **Ordering**: slot accesses are `Relaxed`; each cursor is published with `Release` and
//!   observed with `Acquire`. A slot write happens-before the write-cursor publish that
//!   exposes it, and a slot read happens-before the read-cursor publish that frees it.
//! - **Overrun policy**: drop newest. A full ring never overwrites unread samples.

use std::sync::Arc;
use std::sync::atomic::{AtomicI16, AtomicUsize, Ordering};

struct RingShared {
    slots: Box<[AtomicI16]>,
    capacity: usize,
    /// Cursor modulus (`2 * capacity`).
    wrap: usize,
    /// Next slot to write. Advanced only by the producer.
    write: AtomicUsize,
    /// Next slot to read. Advanced only by the consumer.
    read: AtomicUsize,
}

impl RingShared {
    fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.wrap - from) % self.wrap
    }

    fn advance(&self, cursor: usize, by: usize) -> usize {
        (cursor + by) % self.wrap
    }

    /// Split `len` slots starting at `cursor` into (up to) two contiguous index ranges.
    fn segments(&self, cursor: usize, len: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let start = cursor % self.capacity;
        let first = len.min(self.capacity - start);
        (start..start + first, 0..len - first)
    }

    fn occupancy(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        self.distance(read, write)
    }
}

/// Outcome of a [`RingConsumer::pop_exact`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PopResult {
    /// Real samples copied out of the ring (read cursor advanced by this much).
    pub read: usize,
    /// Samples that were not available and were zero-filled.
    pub missing: usize,
}

impl PopResult {
    /// Whether the request was short (an underrun).
    pub fn is_short(&self) -> bool {
        self.missing > 0
    }
}

/// Writing half of the ring. Owned by the generator thread.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

/// Reading half of the ring. Owned by the playback driver.
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

/// Create a ring holding up to `capacity` samples and split it into its two halves.
///
/// # Panics
/// Panics if `capacity` is zero or too large to keep cursors in `usize` range.
/// [`SessionConfig::validate`](crate::config::SessionConfig::validate) rejects both
/// before a session ever gets here.
pub fn ring_buffer(capacity: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let wrap = capacity
        .checked_mul(2)
        .filter(|w| w.checked_mul(2).is_some())
        .expect("ring capacity too large");

    let slots: Box<[AtomicI16]> = (0..capacity).map(|_| AtomicI16::new(0)).collect();
    let shared = Arc::new(RingShared {
        slots,
        capacity,
        wrap,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });

    (
        RingProducer {
            shared: shared.clone(),
        },
        RingConsumer { shared },
    )
}

impl RingProducer {
    /// Append as many of `samples` as currently fit, returning how many were written.
    ///
    /// Samples beyond the free space are not written; unread data is never overwritten.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let s = &*self.shared;
        let write = s.write.load(Ordering::Relaxed);
        let read = s.read.load(Ordering::Acquire);
        let free = s.capacity - s.distance(read, write);
        let n = samples.len().min(free);
        if n == 0 {
            return 0;
        }

        let (head, tail) = s.segments(write, n);
        let (src_head, src_tail) = samples[..n].split_at(head.len());
        for (slot, &sample) in s.slots[head].iter().zip(src_head) {
            slot.store(sample, Ordering::Relaxed);
        }
        for (slot, &sample) in s.slots[tail].iter().zip(src_tail) {
            slot.store(sample, Ordering::Relaxed);
        }

        s.write.store(s.advance(write, n), Ordering::Release);
        n
    }

    /// Free slots as seen by the producer (may grow concurrently as the consumer reads).
    pub fn free_space(&self) -> usize {
        self.shared.capacity - self.shared.occupancy()
    }

    /// Unread samples (best-effort snapshot).
    pub fn occupancy(&self) -> usize {
        self.shared.occupancy()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl RingConsumer {
    /// Fill `out` with the oldest unread samples, zero-filling whatever is not available.
    ///
    /// Never blocks. The read cursor only advances by the number of real samples returned,
    /// so silence inserted here is never "owed" back to the producer.
    pub fn pop_exact(&mut self, out: &mut [i16]) -> PopResult {
        let s = &*self.shared;
        let read = s.read.load(Ordering::Relaxed);
        let write = s.write.load(Ordering::Acquire);
        let available = s.distance(read, write);
        let n = out.len().min(available);

        let (head, tail) = s.segments(read, n);
        let (dst_head, rest) = out.split_at_mut(head.len());
        let (dst_tail, silence) = rest.split_at_mut(tail.len());
        for (dst, slot) in dst_head.iter_mut().zip(&s.slots[head]) {
            *dst = slot.load(Ordering::Relaxed);
        }
        for (dst, slot) in dst_tail.iter_mut().zip(&s.slots[tail]) {
            *dst = slot.load(Ordering::Relaxed);
        }
        silence.fill(0);

        if n > 0 {
            s.read.store(s.advance(read, n), Ordering::Release);
        }
        PopResult {
            read: n,
            missing: out.len() - n,
        }
    }

    /// Unread samples (best-effort snapshot; may grow concurrently as the producer writes).
    pub fn occupancy(&self) -> usize {
        self.shared.occupancy()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}
