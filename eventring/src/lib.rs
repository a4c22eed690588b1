//! Shared-memory MPSC ring buffer for fixed-size timestamped event records.
//!
//! Many producers append 40-byte entries with a wait-free reservation
//! protocol; a single consumer drains them in reservation order. The region
//! layout is a stable byte-level ABI ([`layout`]) so producer and consumer
//! may live in different processes mapping the same memfd. Timestamps come
//! from the CPU cycle counter ([`cycles`]), calibrated once by the ring
//! owner.
//!
//! # Example
//! ```
//! use eventring::{Consumer, Producer, Ring};
//!
//! let ring = Ring::create(1024)?;
//! let producer = Producer::new(ring.clone());
//! let mut consumer = Consumer::new(ring);
//!
//! producer.publish(7, 1, 2)?;
//! let entry = consumer.pop().expect("just published");
//! assert_eq!(entry.event_id, 7);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod consumer;
pub mod cycles;
pub mod error;
pub mod layout;
pub mod memory;
pub mod producer;
pub mod ring;
mod trace;

pub use consumer::Consumer;
pub use error::{Dropped, RingError};
pub use layout::{
    Geometry, LogEntry, CACHE_LINE_SIZE, CPU_ID_UNKNOWN, FLAG_KERNEL, FLAG_VALID,
};
pub use producer::{Origin, Producer};
pub use ring::Ring;
