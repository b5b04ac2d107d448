//! A circular vector that allows concurrent incremental prefix sums.
//!
//! Producers claim monotonically increasing entries with [`next`], then call
//! [`fetch_and_update`] to read the running prefix published by the previous
//! entry and publish their own. A `LOCK` sentinel marks slots whose value is
//! not yet available, so a producer spin-waits on its predecessor only.
//!
//! [`next`]: ConcurrentCircularVector::next
//! [`fetch_and_update`]: ConcurrentCircularVector::fetch_and_update

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const LOCK: u64 = u64::MAX;

#[derive(Debug)]
pub struct ConcurrentCircularVector {
    counter: AtomicUsize,
    buffer: Vec<AtomicU64>,
}

impl ConcurrentCircularVector {
    /// `size` must be at least as large as the number of cooperating
    /// producers; with fewer slots than producers, every slot could be claimed
    /// while its predecessor is still unwritten and all producers would spin
    /// forever.
    pub fn new(size: usize, num_producers: usize) -> Self {
        assert!(
            size > num_producers,
            "circular vector needs more slots ({size}) than producers ({num_producers})"
        );
        let buffer: Vec<AtomicU64> = (0..size + 1).map(|_| AtomicU64::new(LOCK)).collect();
        buffer[size].store(0, Ordering::Relaxed);
        Self { counter: AtomicUsize::new(0), buffer }
    }

    /// Claims the next entry to write to.
    pub fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Waits for the previous entry, then publishes `previous + delta` in
    /// `entry` and returns the previous value.
    pub fn fetch_and_update(&self, entry: usize, delta: u64) -> u64 {
        let len = self.buffer.len();
        let pos = entry % len;
        let prev_pos = if pos == 0 { len - 1 } else { pos - 1 };

        let mut value = self.buffer[prev_pos].load(Ordering::Acquire);
        while value == LOCK {
            std::hint::spin_loop();
            value = self.buffer[prev_pos].load(Ordering::Acquire);
        }

        debug_assert_ne!(value + delta, LOCK);
        self.buffer[prev_pos].store(LOCK, Ordering::Relaxed);
        self.buffer[pos].store(value + delta, Ordering::Release);

        value
    }
}
