//! Counting semaphore bounded above, used as the active-transfer budget.

use std::sync::{Condvar, Mutex};

/// Counting semaphore whose count never exceeds `max_count`.
///
/// Producer threads `acquire` a permit before submitting a transfer; the
/// scheduler releases one on completion, cancel, and pause, and re-acquires
/// on resume and retry re-admission. `release` clamps at the bound, so a
/// stray extra release cannot inflate the budget.
pub struct BoundedSemaphore {
    count: Mutex<usize>,
    available: Condvar,
    max_count: usize,
}

impl BoundedSemaphore {
    /// Create a semaphore with `initial` permits and upper bound `max_count`.
    pub fn new(initial: usize, max_count: usize) -> Self {
        assert!(initial <= max_count, "initial permits exceed the bound");
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
            max_count,
        }
    }

    /// Take one permit, blocking until one is available.
    pub fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.available.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Take one permit without blocking. Returns false if none are free.
    pub fn try_acquire(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Return one permit, clamped at `max_count`, and wake one waiter.
    pub fn release(&self) {
        let mut count = self.count.lock().unwrap();
        if *count < self.max_count {
            *count += 1;
        }
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn try_acquire_exhausts_and_release_restores() {
        let sema = BoundedSemaphore::new(2, 2);
        assert!(sema.try_acquire());
        assert!(sema.try_acquire());
        assert!(!sema.try_acquire());
        sema.release();
        assert!(sema.try_acquire());
    }

    #[test]
    fn release_clamps_at_bound() {
        let sema = BoundedSemaphore::new(1, 1);
        sema.release();
        sema.release();
        assert!(sema.try_acquire());
        assert!(!sema.try_acquire(), "extra releases must not add permits");
    }

    #[test]
    fn acquire_blocks_until_release() {
        let sema = Arc::new(BoundedSemaphore::new(0, 1));
        let waiter = Arc::clone(&sema);
        let handle = std::thread::spawn(move || waiter.acquire());
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished(), "acquire should block while empty");
        sema.release();
        handle.join().unwrap();
    }
}
