//! Cloneable handle over the shared region with the invariant-preserving
//! accessors both protocol halves build on.

use crate::error::RingError;
use crate::layout::{
    page_align, shm_size_unaligned, Geometry, LogEntry, RingHeader, ENTRY_ARRAY_OFFSET, ENTRY_SIZE,
    FLAG_VALID,
};
use crate::memory::{page_size, Memory};
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// A handle to one shared ring. Clones share the same mapping; the mapping
/// is released when the last clone drops.
#[derive(Clone, Debug)]
pub struct Ring {
    memory: Arc<Memory>,
}

impl Ring {
    /// Create a new ring with `capacity` slots and populate its header.
    /// Geometry is immutable from here on.
    pub fn create(capacity: u64) -> Result<Self, RingError> {
        if !capacity.is_power_of_two() {
            return Err(RingError::CapacityNotPowerOfTwo(capacity));
        }
        if capacity < 2 {
            return Err(RingError::CapacityTooSmall(capacity));
        }

        let unaligned = shm_size_unaligned(capacity);
        let aligned = page_align(unaligned, page_size());
        let memory = Memory::create(aligned)?;

        // The memfd is zero-filled, which is a valid all-zero header; only
        // the write-once metadata words need populating.
        let header = memory.as_ptr().as_ptr() as *mut RingHeader;
        unsafe {
            std::ptr::addr_of_mut!((*header).shm_size_unaligned).write(unaligned as u64);
            std::ptr::addr_of_mut!((*header).shm_size_aligned).write(aligned as u64);
            std::ptr::addr_of_mut!((*header).capacity).write(capacity);
            std::ptr::addr_of_mut!((*header).idx_mask).write(capacity - 1);
        }

        Ok(Ring {
            memory: Arc::new(memory),
        })
    }

    /// Map a ring received from a peer and validate the header against the
    /// geometry advertised over the sideband.
    pub fn open(fd: OwnedFd, geometry: Geometry) -> Result<Self, RingError> {
        let aligned = page_align(geometry.shm_size_unaligned as usize, page_size());
        let memory = Memory::map_fd(fd, aligned)?;
        let ring = Ring {
            memory: Arc::new(memory),
        };
        ring.validate(geometry)?;
        Ok(ring)
    }

    fn validate(&self, geometry: Geometry) -> Result<(), RingError> {
        let header = self.header();
        let checks: [(&'static str, u64, u64); 4] = [
            ("capacity", geometry.capacity, header.capacity),
            ("idx_mask", geometry.idx_mask, header.idx_mask),
            ("idx_mask", header.capacity - 1, header.idx_mask),
            (
                "shm_size_unaligned",
                geometry.shm_size_unaligned,
                header.shm_size_unaligned,
            ),
        ];
        for (field, expected, actual) in checks {
            if expected != actual {
                return Err(RingError::GeometryMismatch {
                    field,
                    expected,
                    actual,
                });
            }
        }
        if !header.capacity.is_power_of_two() || header.capacity < 2 {
            return Err(RingError::CapacityNotPowerOfTwo(header.capacity));
        }
        Ok(())
    }

    pub(crate) fn header(&self) -> &RingHeader {
        unsafe { &*(self.memory.as_ptr().as_ptr() as *const RingHeader) }
    }

    /// Pointer to slot `idx`. Payload fields are written through this by the
    /// reserving producer only, between reservation and publication.
    pub(crate) fn slot_ptr(&self, idx: usize) -> *mut LogEntry {
        debug_assert!(idx < self.capacity() as usize);
        unsafe {
            self.memory
                .as_ptr()
                .as_ptr()
                .add(ENTRY_ARRAY_OFFSET + idx * ENTRY_SIZE) as *mut LogEntry
        }
    }

    /// The flags word of slot `idx`, viewed atomically. The word is a plain
    /// `u16` in the layout; atomicity lives here.
    pub(crate) fn slot_flags(&self, idx: usize) -> &AtomicU16 {
        unsafe {
            let slot = self.slot_ptr(idx);
            &*(std::ptr::addr_of!((*slot).flags) as *const AtomicU16)
        }
    }

    pub fn geometry(&self) -> Geometry {
        let header = self.header();
        Geometry {
            capacity: header.capacity,
            idx_mask: header.idx_mask,
            shm_size_unaligned: header.shm_size_unaligned,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.header().capacity
    }

    pub fn idx_mask(&self) -> u64 {
        self.header().idx_mask
    }

    /// Slots ever reserved. Not "entries available": abandoned drop-path
    /// reservations advance this too.
    pub fn head(&self) -> u64 {
        self.header().head.load(Ordering::Acquire)
    }

    /// Slots consumed.
    pub fn tail(&self) -> u64 {
        self.header().tail.load(Ordering::Acquire)
    }

    /// Total entries dropped on overflow; reset only by [`Ring::reset`].
    pub fn dropped(&self) -> u64 {
        self.header().dropped.load(Ordering::Relaxed)
    }

    pub fn mapped_size(&self) -> usize {
        self.memory.size()
    }

    pub fn memory_fd(&self) -> BorrowedFd {
        self.memory.fd()
    }

    pub fn clone_fd(&self) -> Result<OwnedFd, RingError> {
        self.memory.clone_fd()
    }

    /// Zero head, tail and the drop counter and clear every slot's VALID
    /// bit.
    ///
    /// Not safe against live producers: callers must guarantee externally
    /// that no `publish()` runs for the duration, or the ring state is
    /// undefined. Intended for use between measurement runs.
    pub fn reset(&self) {
        let header = self.header();
        header.head.store(0, Ordering::SeqCst);
        header.tail.store(0, Ordering::SeqCst);
        header.dropped.store(0, Ordering::SeqCst);
        for idx in 0..self.capacity() as usize {
            self.slot_flags(idx).fetch_and(!FLAG_VALID, Ordering::SeqCst);
        }
    }
}
