//! The collecting end: owns the ring, the calibration and the sideband
//! socket, and is the only place a consumer handle exists.

use eventring::cycles;
use eventring::{Consumer, Geometry, LogEntry, Ring};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

use crate::{listener, Result};

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Number of ring slots; power of two, at least 2.
    pub capacity: u64,
    /// Where the control sideband listens.
    pub socket_path: PathBuf,
    /// How long the one-shot cycle calibration blocks at startup.
    pub calibration_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            capacity: 1 << 16,
            socket_path: PathBuf::from("/tmp/hireslog.sock"),
            calibration_interval: cycles::DEFAULT_CALIBRATION_INTERVAL,
        }
    }
}

pub struct Collector {
    consumer: Consumer,
    ring: Ring,
    cycles_per_us: u64,
    socket_path: PathBuf,
    _listener_thread: JoinHandle<()>,
}

impl Collector {
    /// Create the ring, run calibration (blocks for the configured
    /// interval) and start answering sideband requests.
    pub fn create(config: CollectorConfig) -> Result<Self> {
        let ring = Ring::create(config.capacity)?;
        let cycles_per_us = cycles::calibrate(config.calibration_interval)?;
        debug!(
            capacity = config.capacity,
            cycles_per_us, "ring created and calibrated"
        );

        let _ = std::fs::remove_file(&config.socket_path);
        let socket = UnixListener::bind(&config.socket_path)?;
        debug!(socket_path = %config.socket_path.display(), "sideband listening");

        let ring_for_listener = ring.clone();
        let listener_thread = thread::Builder::new()
            .name("hireslog-listener".to_string())
            .spawn(move || listener::serve(socket, ring_for_listener, cycles_per_us))?;

        Ok(Collector {
            consumer: Consumer::new(ring.clone()),
            ring,
            cycles_per_us,
            socket_path: config.socket_path,
            _listener_thread: listener_thread,
        })
    }

    /// Drain the oldest published entry, if any.
    pub fn pop(&mut self) -> Option<LogEntry> {
        self.consumer.pop()
    }

    /// Upper estimate of entries awaiting consumption.
    pub fn available(&self) -> u64 {
        self.consumer.available()
    }

    /// Total entries dropped by producers on overflow.
    pub fn dropped(&self) -> u64 {
        self.consumer.dropped()
    }

    pub fn cycles_per_us(&self) -> u64 {
        self.cycles_per_us
    }

    pub fn geometry(&self) -> Geometry {
        self.ring.geometry()
    }

    /// Reset the ring between measurement runs.
    ///
    /// Every producer must be quiesced externally for the duration; a
    /// publish racing a reset leaves the ring state undefined.
    pub fn reset(&mut self) {
        self.ring.reset();
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
