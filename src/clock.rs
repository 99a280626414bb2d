//! Time source abstraction.
//!
//! The RTU silent interval and the cache staleness windows both need a
//! monotonic clock and a blocking delay. On bare metal that is a hardware
//! timer; on a host it is [`StdClock`]. Owning the clock per driver instance
//! (instead of a process-global tick source) is what lets several supplies
//! hang off one firmware image.

use fugit::MicrosDurationU32;

/// Monotonic time and busy-wait delay, microsecond resolution.
///
/// `now_us` must never go backwards. The epoch is arbitrary; only
/// differences are used. Delays block the calling context - the driver is
/// single-threaded by design and callers accept that a bus operation may
/// block for tens of milliseconds at RTU baud rates.
pub trait Clock {
    /// Microseconds since an arbitrary, fixed epoch.
    fn now_us(&mut self) -> u64;

    /// Busy-wait for the given duration.
    fn delay(&mut self, duration: MicrosDurationU32);
}

/// Host-side clock backed by `std::time::Instant`.
#[cfg(not(feature = "no_std"))]
#[derive(Debug)]
pub struct StdClock {
    epoch: std::time::Instant,
}

#[cfg(not(feature = "no_std"))]
impl StdClock {
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

#[cfg(not(feature = "no_std"))]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(feature = "no_std"))]
impl Clock for StdClock {
    fn now_us(&mut self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn delay(&mut self, duration: MicrosDurationU32) {
        std::thread::sleep(std::time::Duration::from_micros(u64::from(
            duration.to_micros(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_clock_is_monotonic() {
        let mut clock = StdClock::new();
        let a = clock.now_us();
        clock.delay(MicrosDurationU32::micros(200));
        let b = clock.now_us();
        assert!(b >= a + 200);
    }
}
