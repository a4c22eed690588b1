//! Consumer half of the ring protocol. Single consumer, tail-driven.

use crate::layout::{Geometry, LogEntry, FLAG_VALID};
use crate::ring::Ring;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::Ordering;

/// How many scheduler yields to spend waiting for a reserved slot to become
/// VALID before giving up on this `pop`. Covers the window where a producer
/// was preempted between reservation and publication, and slots abandoned by
/// the drop path (which can never become valid for the current generation).
const SPIN_YIELD_BUDGET: u32 = 100;

/// Draining handle. Exactly one per ring: it holds the authoritative view of
/// `tail` and is the sole writer of it, so it is neither `Send` nor `Sync`.
pub struct Consumer {
    ring: Ring,
    idx_mask: u64,
    _single_thread: PhantomData<*mut ()>,
}

impl Consumer {
    pub fn new(ring: Ring) -> Self {
        let idx_mask = ring.idx_mask();
        Consumer {
            ring,
            idx_mask,
            _single_thread: PhantomData,
        }
    }

    /// Copy out the oldest published entry, clear its VALID bit and free the
    /// slot.
    ///
    /// Returns `None` when the ring is empty, or when the next slot did not
    /// turn VALID within a bounded spin; in the latter case `tail` is left
    /// alone and the same slot is retried on the next call.
    pub fn pop(&mut self) -> Option<LogEntry> {
        let header = self.ring.header();

        // Only this handle writes tail.
        let t = header.tail.load(Ordering::Relaxed);
        let head = header.head.load(Ordering::Acquire);
        if t == head {
            crate::ring_trace!(tail = t, "ring empty");
            return None;
        }

        let idx = (t & self.idx_mask) as usize;
        let flags = self.ring.slot_flags(idx);

        let mut observed = flags.load(Ordering::Acquire);
        let mut spins = 0;
        while observed & FLAG_VALID == 0 {
            if spins == SPIN_YIELD_BUDGET {
                crate::ring_trace!(tail = t, idx = idx, "slot not published within spin budget");
                return None;
            }
            spins += 1;
            std::thread::yield_now();
            observed = flags.load(Ordering::Acquire);
        }

        // The acquire above pairs with the producer's release publish, so
        // the payload reads below see exactly the published entry.
        let entry = unsafe { ptr::read(self.ring.slot_ptr(idx)) };

        // Advisory: a fresh producer overwrites the whole flags word anyway.
        flags.store(observed & !FLAG_VALID, Ordering::Relaxed);

        header.tail.store(t + 1, Ordering::Release);

        crate::ring_trace!(
            tail = t + 1,
            event_id = entry.event_id,
            "entry consumed"
        );
        Some(entry)
    }

    /// Upper estimate of entries awaiting consumption. Abandoned drop-path
    /// reservations are counted until the consumer skips past them, so this
    /// can transiently exceed the number of published entries.
    pub fn available(&self) -> u64 {
        let header = self.ring.header();
        let head = header.head.load(Ordering::Acquire);
        let tail = header.tail.load(Ordering::Relaxed);
        head.saturating_sub(tail)
    }

    /// Total entries dropped by producers on overflow.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }

    pub fn geometry(&self) -> Geometry {
        self.ring.geometry()
    }
}
