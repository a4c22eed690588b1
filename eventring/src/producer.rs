//! Producer half of the ring protocol.
//!
//! Reservation is a single fetch-add on `head`, so publication is wait-free
//! and safe from any number of threads. A full ring is a silent drop with a
//! counter: the reserved slot is abandoned without rolling `head` back,
//! because a rollback would add a second contended atomic and a window where
//! `head < tail`. Consumers only ever trust slots whose VALID bit is set.

use crate::cycles;
use crate::error::Dropped;
use crate::layout::{FLAG_KERNEL, FLAG_VALID};
use crate::ring::Ring;
use std::ptr;
use std::sync::atomic::Ordering;

/// Execution context an entry is attributed to, recorded in the entry's
/// flags so the consumer can tell producers on either side of a privilege
/// boundary apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    User,
    Kernel,
}

impl Origin {
    fn flag_bits(self) -> u16 {
        match self {
            Origin::User => 0,
            Origin::Kernel => FLAG_KERNEL,
        }
    }
}

/// Publishing handle. Cheap to clone; safe to share across threads.
#[derive(Clone)]
pub struct Producer {
    ring: Ring,
    capacity: u64,
    idx_mask: u64,
    origin_bits: u16,
}

impl Producer {
    pub fn new(ring: Ring) -> Self {
        Self::with_origin(ring, Origin::User)
    }

    pub fn with_origin(ring: Ring, origin: Origin) -> Self {
        let capacity = ring.capacity();
        let idx_mask = ring.idx_mask();
        Producer {
            ring,
            capacity,
            idx_mask,
            origin_bits: origin.flag_bits(),
        }
    }

    /// Timestamp and append one entry.
    ///
    /// Wait-free: one fetch-add, one acquire load, five plain stores and one
    /// release store. On a full ring the drop counter is bumped and
    /// `Err(Dropped)` returned; nothing is logged and nothing allocates.
    #[inline]
    pub fn publish(&self, event_id: u32, data1: u64, data2: u64) -> Result<(), Dropped> {
        let header = self.ring.header();

        let h = header.head.fetch_add(1, Ordering::AcqRel);

        let tail = header.tail.load(Ordering::Acquire);
        if h - tail >= self.capacity {
            header.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Dropped);
        }

        let idx = (h & self.idx_mask) as usize;
        let (timestamp, cpu_id) = cycles::now_with_cpu();

        unsafe {
            let slot = self.ring.slot_ptr(idx);
            ptr::addr_of_mut!((*slot).timestamp).write(timestamp);
            ptr::addr_of_mut!((*slot).event_id).write(event_id);
            ptr::addr_of_mut!((*slot).cpu_id).write(cpu_id);
            ptr::addr_of_mut!((*slot).data1).write(data1);
            ptr::addr_of_mut!((*slot).data2).write(data2);
        }

        // Single synchronization edge per entry: the whole-word store both
        // clears any stale bits from a prior generation and sets VALID, and
        // its release ordering makes the payload stores above visible to a
        // consumer that acquires the flag.
        self.ring
            .slot_flags(idx)
            .store(FLAG_VALID | self.origin_bits, Ordering::Release);

        Ok(())
    }

    /// Total entries dropped on overflow, for callers that want to observe
    /// loss; the ring itself never signals it out of band.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}
