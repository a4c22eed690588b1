//! The producing end: attaches to a collector's ring over the sideband and
//! publishes entries.

use eventring::{Dropped, Geometry, Origin, Producer, Ring};
use std::path::Path;
use tracing::debug;

use crate::client::ControlClient;
use crate::Result;

/// Publishing handle bound to one collector's ring. Safe to share across
/// threads; publishing never blocks.
pub struct Logger {
    producer: Producer,
    geometry: Geometry,
    cycles_per_us: u64,
    control: ControlClient,
}

impl Logger {
    /// Attach as an unprivileged producer.
    pub fn attach<P: AsRef<Path>>(socket_path: P) -> Result<Self> {
        Self::attach_with_origin(socket_path, Origin::User)
    }

    /// Attach with an explicit origin; entries from a `Kernel` producer
    /// carry the KERNEL flag bit so the consumer can tell them apart.
    pub fn attach_with_origin<P: AsRef<Path>>(socket_path: P, origin: Origin) -> Result<Self> {
        let mut control = ControlClient::connect(socket_path)?;
        let (wire, cycles_per_us, fd) = control.attach()?;

        let geometry = Geometry {
            capacity: wire.capacity,
            idx_mask: wire.idx_mask,
            shm_size_unaligned: wire.shm_size_unaligned,
        };

        // Ring::open re-checks the advertised geometry against the mapped
        // header, so a stale or mismatched collector fails here instead of
        // corrupting the ring later.
        let ring = Ring::open(fd, geometry)?;
        debug!(
            capacity = geometry.capacity,
            cycles_per_us,
            ?origin,
            "attached to ring"
        );

        Ok(Logger {
            producer: Producer::with_origin(ring, origin),
            geometry,
            cycles_per_us,
            control,
        })
    }

    /// Timestamp and append one entry. Wait-free; `Err(Dropped)` means the
    /// ring was full and the entry was counted into `dropped_count`.
    #[inline]
    pub fn publish(&self, event_id: u32, data1: u64, data2: u64) -> Result<(), Dropped> {
        self.producer.publish(event_id, data1, data2)
    }

    /// Cached geometry from attach time.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Re-query geometry over the sideband. Returns the same record for the
    /// life of the ring.
    pub fn refresh_geometry(&mut self) -> Result<Geometry> {
        let wire = self.control.geometry()?;
        Ok(Geometry {
            capacity: wire.capacity,
            idx_mask: wire.idx_mask,
            shm_size_unaligned: wire.shm_size_unaligned,
        })
    }

    /// Calibrated cycles-per-microsecond for interpreting entry timestamps.
    pub fn cycles_per_us(&self) -> u64 {
        self.cycles_per_us
    }

    /// Total entries dropped on overflow, for callers that want to observe
    /// loss periodically.
    pub fn dropped(&self) -> u64 {
        self.producer.dropped()
    }
}
