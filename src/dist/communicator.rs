//! Communication contract of the message-passing engine.
//!
//! The partitioning algorithms are bulk-synchronous: every phase is pure
//! local compute followed by a collective. They only ever need the tiny
//! surface below, so process layout and transport stay behind this trait; an
//! MPI binding implements it the same way the in-process backends here do.
//!
//! Wire conventions for payloads: little-endian fixed width integers,
//! `#[repr(C)]` structs cast with bytemuck; a message batch is a plain array
//! of one struct type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Collective operations of one rank group. All ranks must call the same
/// sequence of collectives; each call is a superstep boundary.
pub trait Communicator: Send + Sync {
    /// Rank of this process, `0..size`.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Blocks until every rank reached the barrier.
    fn barrier(&self);

    /// Element-wise sum over all ranks; every rank receives the result.
    fn allreduce_sum(&self, buf: &mut [i64]);

    /// Sparse all-to-all: `outgoing[p]` is delivered to rank `p`; the result
    /// holds one buffer per source rank (possibly empty).
    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>>;
}

/// Single-rank communicator for serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn allreduce_sum(&self, _buf: &mut [i64]) {}

    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        debug_assert_eq!(outgoing.len(), 1);
        outgoing
    }
}

struct BarrierState {
    arrived: usize,
    epoch: u64,
}

struct ReduceState {
    count: usize,
    epoch: u64,
    acc: Vec<i64>,
    result: Vec<i64>,
}

struct ExchangeState {
    slots: HashMap<(u64, usize, usize), Vec<u8>>,
}

/// Shared state of one in-process rank group.
struct ThreadCommGroup {
    size: usize,
    barrier: (Mutex<BarrierState>, Condvar),
    reduce: (Mutex<ReduceState>, Condvar),
    exchange: (Mutex<ExchangeState>, Condvar),
}

/// In-process communicator: ranks are threads of one process sharing a
/// mailbox. Mirrors the message-passing semantics closely enough to run and
/// test every distributed algorithm without an MPI launcher.
pub struct ThreadComm {
    rank: usize,
    group: Arc<ThreadCommGroup>,
    generation: AtomicU64,
}

/// Creates the communicators of a `size`-rank in-process group.
pub fn thread_comm_group(size: usize) -> Vec<ThreadComm> {
    assert!(size > 0);
    let group = Arc::new(ThreadCommGroup {
        size,
        barrier: (Mutex::new(BarrierState { arrived: 0, epoch: 0 }), Condvar::new()),
        reduce: (
            Mutex::new(ReduceState { count: 0, epoch: 0, acc: Vec::new(), result: Vec::new() }),
            Condvar::new(),
        ),
        exchange: (Mutex::new(ExchangeState { slots: HashMap::new() }), Condvar::new()),
    });

    (0..size)
        .map(|rank| ThreadComm { rank, group: Arc::clone(&group), generation: AtomicU64::new(0) })
        .collect()
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size
    }

    fn barrier(&self) {
        let (lock, cv) = &self.group.barrier;
        let mut state = lock.lock().expect("barrier poisoned");
        state.arrived += 1;
        if state.arrived == self.group.size {
            state.arrived = 0;
            state.epoch += 1;
            cv.notify_all();
        } else {
            let epoch = state.epoch;
            while state.epoch == epoch {
                state = cv.wait(state).expect("barrier poisoned");
            }
        }
    }

    fn allreduce_sum(&self, buf: &mut [i64]) {
        let (lock, cv) = &self.group.reduce;
        let mut state = lock.lock().expect("reduce poisoned");

        if state.count == 0 {
            state.acc = buf.to_vec();
        } else {
            debug_assert_eq!(state.acc.len(), buf.len());
            for (slot, &x) in state.acc.iter_mut().zip(buf.iter()) {
                *slot += x;
            }
        }
        state.count += 1;

        if state.count == self.group.size {
            state.result = std::mem::take(&mut state.acc);
            state.count = 0;
            state.epoch += 1;
            cv.notify_all();
        } else {
            let epoch = state.epoch;
            while state.epoch == epoch {
                state = cv.wait(state).expect("reduce poisoned");
            }
        }
        buf.copy_from_slice(&state.result);
    }

    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        debug_assert_eq!(outgoing.len(), self.group.size);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let (lock, cv) = &self.group.exchange;
        {
            let mut state = lock.lock().expect("exchange poisoned");
            for (dst, buf) in outgoing.into_iter().enumerate() {
                state.slots.insert((generation, self.rank, dst), buf);
            }
            cv.notify_all();
        }

        let mut incoming = Vec::with_capacity(self.group.size);
        for src in 0..self.group.size {
            let mut state = lock.lock().expect("exchange poisoned");
            loop {
                if let Some(buf) = state.slots.remove(&(generation, src, self.rank)) {
                    incoming.push(buf);
                    break;
                }
                state = cv.wait(state).expect("exchange poisoned");
            }
        }
        incoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ranks<F>(size: usize, f: F)
    where
        F: Fn(&ThreadComm) + Send + Sync,
    {
        let comms = thread_comm_group(size);
        std::thread::scope(|scope| {
            for comm in &comms {
                scope.spawn(|| f(comm));
            }
        });
    }

    #[test]
    fn test_allreduce_sums_across_ranks() {
        // Arrange and Act
        run_ranks(3, |comm| {
            let mut buf = vec![comm.rank() as i64 + 1, 10];
            comm.allreduce_sum(&mut buf);

            // Assert
            assert_eq!(buf, vec![6, 30]);
        });
    }

    #[test]
    fn test_exchange_routes_by_rank() {
        // Arrange and Act
        run_ranks(3, |comm| {
            let outgoing: Vec<Vec<u8>> =
                (0..3).map(|dst| vec![comm.rank() as u8, dst as u8]).collect();
            let incoming = comm.exchange(outgoing);

            // Assert
            for (src, buf) in incoming.iter().enumerate() {
                assert_eq!(buf, &vec![src as u8, comm.rank() as u8]);
            }
        });
    }

    #[test]
    fn test_repeated_collectives_stay_in_step() {
        // Arrange and Act
        run_ranks(2, |comm| {
            for round in 0..10i64 {
                let mut buf = vec![round];
                comm.allreduce_sum(&mut buf);
                assert_eq!(buf, vec![2 * round]);
                comm.barrier();
            }
        });
    }

    #[test]
    fn test_no_comm_is_identity() {
        // Arrange
        let comm = NoComm;

        // Act
        let incoming = comm.exchange(vec![vec![1, 2, 3]]);

        // Assert
        assert_eq!(incoming, vec![vec![1, 2, 3]]);
    }
}
