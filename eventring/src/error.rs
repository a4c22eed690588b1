use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("capacity must be a power of two, got {0}")]
    CapacityNotPowerOfTwo(u64),

    #[error("capacity must be at least 2, got {0}")]
    CapacityTooSmall(u64),

    #[error("memory mapping failed: {0}")]
    MmapFailed(#[from] nix::errno::Errno),

    #[error("ring header disagrees with advertised geometry: {field} expected {expected}, found {actual}")]
    GeometryMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Publish outcome when the ring is full. The reserved slot is abandoned and
/// `dropped_count` incremented; nothing is logged and nothing allocates.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("ring full, entry dropped")]
pub struct Dropped;
