//! Worker groups for the quasi-particle partition.
//!
//! Every worker of a group runs the same Markov chain in lock-step and owns a
//! contiguous slice of the amplitude components. The reductions below are the
//! only synchronisation points between workers. Workers are threads of one
//! process ([`ThreadGroup`]) or, with the `mpi` feature, the processes of an
//! MPI world.

use std::ops::Range;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Result, VmcError};

/// Collective operations shared by the workers of one chain.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sum of `value` over all workers, identical on every worker.
    fn all_reduce_sum(&self, value: f64) -> Result<f64>;

    /// Maximum of `value` over all workers.
    fn all_reduce_max(&self, value: i32) -> Result<i32>;

    /// Terminate the whole group. Pending and later reductions on every
    /// worker fail with [`VmcError::GroupAborted`].
    fn abort(&self);

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn all_reduce_sum(&self, value: f64) -> Result<f64> {
        (**self).all_reduce_sum(value)
    }

    fn all_reduce_max(&self, value: i32) -> Result<i32> {
        (**self).all_reduce_max(value)
    }

    fn abort(&self) {
        (**self).abort()
    }
}

/// A group with a single worker.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, value: f64) -> Result<f64> {
        Ok(value)
    }

    fn all_reduce_max(&self, value: i32) -> Result<i32> {
        Ok(value)
    }

    fn abort(&self) {}
}

#[derive(Debug)]
struct ReduceState {
    generation: u64,
    arrived: usize,
    slots: Vec<f64>,
    result: f64,
    aborted: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ReduceState>,
    cond: Condvar,
}

/// In-process worker group; hand one [`ThreadComm`] to each worker thread.
pub struct ThreadGroup;

impl ThreadGroup {
    pub fn new(size: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ReduceState {
                generation: 0,
                arrived: 0,
                slots: vec![0.0; size],
                result: 0.0,
                aborted: false,
            }),
            cond: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One worker's handle on a [`ThreadGroup`].
#[derive(Debug, Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Deposit `value`, wait for every peer, and combine the slots in rank order.
    fn reduce(&self, value: f64, combine: fn(&[f64]) -> f64) -> Result<f64> {
        let mut state = self.shared.state.lock().map_err(|_| VmcError::GroupAborted)?;
        if state.aborted {
            return Err(VmcError::GroupAborted);
        }
        let generation = state.generation;
        state.slots[self.rank] = value;
        state.arrived += 1;

        if state.arrived == self.size {
            state.result = combine(&state.slots);
            state.arrived = 0;
            state.generation += 1;
            self.shared.cond.notify_all();
            return Ok(state.result);
        }

        while state.generation == generation && !state.aborted {
            state = self.shared.cond.wait(state).map_err(|_| VmcError::GroupAborted)?;
        }
        if state.generation == generation {
            return Err(VmcError::GroupAborted);
        }
        Ok(state.result)
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce_sum(&self, value: f64) -> Result<f64> {
        self.reduce(value, |slots| slots.iter().sum())
    }

    fn all_reduce_max(&self, value: i32) -> Result<i32> {
        let max = self.reduce(f64::from(value), |slots| {
            slots.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        })?;
        Ok(max as i32)
    }

    fn abort(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.aborted = true;
        }
        self.shared.cond.notify_all();
    }
}

/// Workers as the processes of an MPI world.
#[cfg(feature = "mpi")]
mod world {
    use mpi::collective::{CommunicatorCollectives, SystemOperation};
    use mpi::topology::{Communicator as MpiCommunicator, SimpleCommunicator};

    use super::Communicator;
    use crate::error::Result;

    /// Exit code handed to the MPI runtime when one process stops the group.
    const ABORT_CODE: i32 = 1;

    impl Communicator for SimpleCommunicator {
        fn rank(&self) -> usize {
            MpiCommunicator::rank(self) as usize
        }

        fn size(&self) -> usize {
            MpiCommunicator::size(self) as usize
        }

        fn all_reduce_sum(&self, value: f64) -> Result<f64> {
            let mut total = 0.0;
            self.all_reduce_into(&value, &mut total, SystemOperation::sum());
            Ok(total)
        }

        fn all_reduce_max(&self, value: i32) -> Result<i32> {
            let mut max = 0;
            self.all_reduce_into(&value, &mut max, SystemOperation::max());
            Ok(max)
        }

        fn abort(&self) {
            MpiCommunicator::abort(self, ABORT_CODE)
        }
    }
}

/// Contiguous share of `n` items owned by `rank` out of `size` workers.
///
/// The first `n % size` ranks take one extra item.
pub fn split_range(n: usize, rank: usize, size: usize) -> Range<usize> {
    let num = n / size;
    let rem = n % size;
    if rank < rem {
        let start = rank * (num + 1);
        start..start + num + 1
    } else {
        let start = rank * num + rem;
        start..start + num
    }
}
