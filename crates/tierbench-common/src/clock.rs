//! Cycle Clock
//!
//! Raw cycle counter reads, a one-off calibration against the monotonic
//! clock, and the busy-wait primitive every pacing loop uses.
//!
//! Pacing spins on the counter and never sleeps. Callers are expected to be
//! pinned to a dedicated core.

use crate::error::{CommonError, CommonResult};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds since process start from the monotonic clock
#[inline(always)]
pub fn monotonic_ns() -> u64 {
    epoch().elapsed().as_nanos() as u64
}

/// Raw cycle counter read
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    // SAFETY: rdtsc has no memory effects and is available on every x86_64 CPU
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Raw cycle counter read (monotonic nanoseconds on other targets)
#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    monotonic_ns()
}

/// Calibrated cycle clock
#[derive(Debug, Clone, Copy)]
pub struct CycleClock {
    hz: u64,
}

impl CycleClock {
    /// Clock with a known frequency
    pub fn with_hz(hz: u64) -> Self {
        Self { hz: hz.max(1) }
    }

    /// Two-point calibration against the monotonic clock over `window`
    pub fn calibrate(window: Duration) -> CommonResult<Self> {
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = window;
            return Ok(Self::with_hz(1_000_000_000));
        }

        #[cfg(target_arch = "x86_64")]
        {
            let c0 = read_cycles();
            let t0 = Instant::now();
            std::thread::sleep(window);
            let c1 = read_cycles();
            let elapsed = t0.elapsed().as_nanos() as u64;

            let delta = c1.wrapping_sub(c0);
            if delta == 0 || elapsed == 0 {
                return Err(CommonError::Calibration("zero delta".into()));
            }
            let hz = (delta as u128 * 1_000_000_000 / elapsed as u128) as u64;
            tracing::info!(mhz = hz / 1_000_000, "cycle clock calibrated");
            Ok(Self::with_hz(hz))
        }
    }

    /// Counter frequency
    #[inline(always)]
    pub fn hz(&self) -> u64 {
        self.hz
    }

    /// Current counter value
    #[inline(always)]
    pub fn now(&self) -> u64 {
        read_cycles()
    }

    /// Convert a cycle delta to nanoseconds
    #[inline(always)]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as u128 * 1_000_000_000 / self.hz as u128) as u64
    }

    /// Convert a cycle delta to microseconds (fractional)
    #[inline(always)]
    pub fn cycles_to_us(&self, cycles: u64) -> f64 {
        cycles as f64 * 1_000_000.0 / self.hz as f64
    }

    /// Convert nanoseconds to cycles
    #[inline(always)]
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        (self.hz as u128 * ns as u128 / 1_000_000_000) as u64
    }

    /// Convert milliseconds to cycles
    #[inline(always)]
    pub fn ms_to_cycles(&self, ms: u64) -> u64 {
        (self.hz as u128 * ms as u128 / 1_000) as u64
    }

    /// Spin until `cycles` have elapsed
    #[inline]
    pub fn spin_cycles(&self, cycles: u64) {
        if cycles == 0 {
            return;
        }
        let end = read_cycles().wrapping_add(cycles);
        while read_cycles() < end {
            std::hint::spin_loop();
        }
    }

    /// Spin for `ns` nanoseconds
    #[inline]
    pub fn spin_ns(&self, ns: u64) {
        self.spin_cycles(self.ns_to_cycles(ns));
    }

    /// Spin for `us` microseconds
    #[inline]
    pub fn spin_us(&self, us: u64) {
        self.spin_ns(us.saturating_mul(1_000));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let clock = CycleClock::with_hz(2_000_000_000);
        assert_eq!(clock.cycles_to_ns(2_000), 1_000);
        assert_eq!(clock.ns_to_cycles(1_000), 2_000);
        assert_eq!(clock.ms_to_cycles(1), 2_000_000);
        assert!((clock.cycles_to_us(4_000) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_counter_monotonic() {
        let a = read_cycles();
        let b = read_cycles();
        assert!(b >= a);
    }

    #[test]
    fn test_spin_waits_at_least() {
        let clock = CycleClock::calibrate(Duration::from_millis(20)).unwrap();
        let start = Instant::now();
        clock.spin_us(200);
        assert!(start.elapsed() >= Duration::from_micros(150));
    }

    #[test]
    fn test_zero_spin_returns() {
        CycleClock::with_hz(1).spin_cycles(0);
    }
}
