//! Sampling module - move proposals, the Metropolis driver and the exhaustive walk.

mod traits;
mod buffer;
mod moves;
mod vmc;
mod walk;

pub use traits::{BurnInStore, SampleBuffer, SampleRecord};
pub use buffer::{MemoryBurnIn, VecSampleBuffer};
pub use moves::{propose, propose_exchange, propose_hopping, MoveCandidate, Proposal, UpdateKind, UpdatePath};
pub use vmc::{
    metropolis_weight, ChainOutcome, ChainPhase, ChainStats, MoveStats, SamplingParams, VmcSampler,
    MAX_INITIAL_ATTEMPTS,
};
pub use walk::walk_configurations;
