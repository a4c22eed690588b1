//! Cycle-counter time source and one-shot calibration.
//!
//! On x86_64 readings come from `rdtsc`/`rdtscp`; elsewhere the monotonic
//! raw clock stands in, keeping the same monotonicity contract (and a
//! calibrated ratio of ~1000 cycles per microsecond). All producers on a
//! ring use the same source, so the consumer interprets timestamps with a
//! single `cycles_per_us` obtained from the control sideband.

use crate::layout::CPU_ID_UNKNOWN;
use nix::time::{clock_gettime, ClockId};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("calibration interval measured as non-positive")]
    NonPositiveInterval,

    #[error("cycle counter did not advance during calibration")]
    CounterStalled,
}

/// Default calibration interval. Shorter intervals trade accuracy for
/// startup latency; below ~50 ms the ratio gets noisy.
pub const DEFAULT_CALIBRATION_INTERVAL: Duration = Duration::from_millis(500);

/// Read the cycle counter with no serialization. Fast path.
#[inline(always)]
pub fn now() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        monotonic_raw_ns()
    }
}

/// Read the cycle counter behind a serializing fence, so the reading is not
/// reordered with earlier loads. Used for calibration endpoints.
#[inline(always)]
pub fn now_serialized() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_lfence();
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        monotonic_raw_ns()
    }
}

/// Read the cycle counter and the executing CPU in one instruction.
///
/// `rdtscp` returns `IA32_TSC_AUX`, which Linux populates with
/// `(node << 12) | cpu`; the low 12 bits are the logical CPU id.
#[inline(always)]
pub fn now_with_cpu() -> (u64, u32) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        let mut aux: u32 = 0;
        let tsc = core::arch::x86_64::__rdtscp(&mut aux);
        (tsc, aux & 0xfff)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        (monotonic_raw_ns(), current_cpu())
    }
}

/// Logical CPU the caller is running on, or [`CPU_ID_UNKNOWN`].
#[inline]
pub fn current_cpu() -> u32 {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        CPU_ID_UNKNOWN
    } else {
        cpu as u32
    }
}

fn monotonic_raw_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC_RAW) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(_) => 0,
    }
}

/// Measure the counter against the monotonic raw clock over `interval` and
/// return integer cycles per microsecond.
///
/// Blocks for the full interval. Run once at subsystem start; attaching
/// peers read the cached value over the control sideband instead of
/// re-calibrating.
pub fn calibrate(interval: Duration) -> Result<u64, CalibrationError> {
    let wall_start = monotonic_raw_ns();
    let start = now_serialized();

    std::thread::sleep(interval);

    let wall_end = monotonic_raw_ns();
    let end = now_serialized();

    let elapsed_ns = wall_end
        .checked_sub(wall_start)
        .filter(|ns| *ns > 0)
        .ok_or(CalibrationError::NonPositiveInterval)?;
    let elapsed_cycles = end
        .checked_sub(start)
        .filter(|c| *c > 0)
        .ok_or(CalibrationError::CounterStalled)?;

    let cycles_per_us = (elapsed_cycles as u128 * 1000 / elapsed_ns as u128) as u64;
    if cycles_per_us == 0 {
        return Err(CalibrationError::CounterStalled);
    }
    Ok(cycles_per_us)
}

/// Cycles to microseconds, rounded to nearest. Monotonic in `cycles`.
#[inline]
pub fn to_micros(cycles: u64, cycles_per_us: u64) -> u64 {
    ((cycles as u128 + cycles_per_us as u128 / 2) / cycles_per_us as u128) as u64
}

/// Cycles to nanoseconds, rounded to nearest. Monotonic in `cycles`.
#[inline]
pub fn to_nanos(cycles: u64, cycles_per_us: u64) -> u64 {
    ((cycles as u128 * 1000 + cycles_per_us as u128 / 2) / cycles_per_us as u128) as u64
}

/// Cycles to seconds.
#[inline]
pub fn to_seconds(cycles: u64, cycles_per_us: u64) -> f64 {
    cycles as f64 / (cycles_per_us as f64 * 1e6)
}

/// Microseconds to cycles.
#[inline]
pub fn from_micros(us: u64, cycles_per_us: u64) -> u64 {
    us.saturating_mul(cycles_per_us)
}

/// Nanoseconds to cycles, rounded to nearest. Monotonic in `ns`.
#[inline]
pub fn from_nanos(ns: u64, cycles_per_us: u64) -> u64 {
    ((ns as u128 * cycles_per_us as u128 + 500) / 1000) as u64
}

/// Busy-wait for `us` microseconds without yielding the CPU. Sleeping would
/// let the core drop to a low-power state and skew subsequent measurements.
pub fn busy_wait(us: u64, cycles_per_us: u64) {
    let stop = now().wrapping_add(from_micros(us, cycles_per_us));
    while now() < stop {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_monotonic() {
        let mut prev = now();
        for _ in 0..10_000 {
            let next = now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn serialized_readings_are_monotonic() {
        let a = now_serialized();
        let b = now_serialized();
        assert!(b >= a);
    }

    #[test]
    fn calibrate_returns_plausible_ratio() {
        let cycles_per_us = calibrate(Duration::from_millis(50)).unwrap();
        // Anything from a slow VM clock to a 10 GHz part.
        assert!(cycles_per_us >= 1, "ratio {}", cycles_per_us);
        assert!(cycles_per_us < 100_000, "ratio {}", cycles_per_us);
    }

    #[test]
    fn conversions_round_to_nearest() {
        // 3 cycles/us: 4 cycles = 1333.33 ns -> 1333; 5 cycles = 1666.67 -> 1667.
        assert_eq!(to_nanos(4, 3), 1333);
        assert_eq!(to_nanos(5, 3), 1667);
        assert_eq!(to_micros(2999, 1000), 3);
        assert_eq!(to_micros(3499, 1000), 3);
        assert_eq!(to_micros(3500, 1000), 4);
    }

    #[test]
    fn conversions_are_monotonic() {
        let cycles_per_us = 2400;
        let mut prev = 0;
        for cycles in (0..1_000_000u64).step_by(997) {
            let ns = to_nanos(cycles, cycles_per_us);
            assert!(ns >= prev);
            prev = ns;
        }
    }

    #[test]
    fn nanos_round_trip_within_rounding_error() {
        let cycles_per_us = 3000;
        for ns in [0u64, 1, 999, 1000, 123_456, 10_000_000] {
            let back = to_nanos(from_nanos(ns, cycles_per_us), cycles_per_us);
            assert!(back.abs_diff(ns) <= 1, "ns {} -> {}", ns, back);
        }
    }

    #[test]
    fn current_cpu_is_known_on_linux() {
        assert_ne!(current_cpu(), CPU_ID_UNKNOWN);
    }
}
