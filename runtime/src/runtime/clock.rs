// runtime/src/runtime/clock.rs
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::wasi_syscalls::types::{Errno, WasiResult};

// WASI clock IDs
pub const CLOCK_REALTIME: u32 = 0;
pub const CLOCK_MONOTONIC: u32 = 1;
pub const CLOCK_PROCESS_CPUTIME_ID: u32 = 2;
pub const CLOCK_THREAD_CPUTIME_ID: u32 = 3;

/// Per-runtime time source. Monotonic and CPU clocks count from the moment
/// the runtime was created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock { origin: Instant::now() }
    }

    /// Current time of `clock_id` in nanoseconds.
    pub fn now(&self, clock_id: u32) -> WasiResult<u64> {
        match clock_id {
            CLOCK_REALTIME => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .map_err(|_| Errno::Overflow),
            CLOCK_MONOTONIC | CLOCK_PROCESS_CPUTIME_ID | CLOCK_THREAD_CPUTIME_ID => {
                Ok(self.origin.elapsed().as_nanos() as u64)
            }
            _ => Err(Errno::Inval),
        }
    }

    pub fn resolution(&self, clock_id: u32) -> WasiResult<u64> {
        match clock_id {
            CLOCK_REALTIME..=CLOCK_THREAD_CPUTIME_ID => Ok(1_000),
            _ => Err(Errno::Inval),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let clock = Clock::new();
        let a = clock.now(CLOCK_MONOTONIC).unwrap();
        let b = clock.now(CLOCK_MONOTONIC).unwrap();
        assert!(b >= a);
        assert!(clock.now(CLOCK_REALTIME).unwrap() > 0);
        assert_eq!(clock.now(9), Err(Errno::Inval));
        assert_eq!(clock.resolution(4), Err(Errno::Inval));
    }
}
