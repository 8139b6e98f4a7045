//! Small shared primitives: wall clock, jitter, semaphore, sliding window.

mod jitter;
mod semaphore;
mod window;

pub use jitter::jitter;
pub use semaphore::BoundedSemaphore;
pub use window::SlidingWindow;

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the Unix epoch, measured from a monotonic clock
/// anchored to the wall clock at first use. NTP adjustments after startup do
/// not move this clock, so retry deadlines keyed on it cannot jump.
pub fn now_wall() -> f64 {
    static ANCHOR: OnceLock<(Instant, f64)> = OnceLock::new();
    let (origin, wall) = ANCHOR.get_or_init(|| {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        (Instant::now(), wall)
    });
    wall + origin.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_wall_is_monotonic() {
        let a = now_wall();
        let b = now_wall();
        assert!(b >= a);
        assert!(a > 1_000_000_000.0, "should be epoch seconds, got {}", a);
    }
}
