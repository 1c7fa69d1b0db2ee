//! Lattice VMC - Variational Monte Carlo sampling of electron configurations on a lattice
//!
//! This crate provides the Metropolis sampler of a many-variable VMC code: electron
//! configurations with incremental move updates, a multi-component Slater determinant
//! amplitude oracle with Gutzwiller-Jastrow projector, an exhaustive enumeration mode
//! for half-filled spin models, and extraction of every evaluated amplitude.

pub mod error;
pub mod lattice;
pub mod wavefunction;
pub mod parallel;
pub mod sampling;
pub mod io;

// Re-export commonly used types at crate root
pub use error::{Result, VmcError};
pub use lattice::{permutation_sign, ElectronConfiguration, LatticeModel, Spin};
pub use wavefunction::{
    tight_binding_orbitals, AmplitudeOracle, GutzwillerJastrow, LatticeSlater, NoProjector, OrbitalSet, Projector,
    ProjectorCounts,
};
pub use parallel::{split_range, Communicator, SelfComm, ThreadComm, ThreadGroup};
pub use sampling::{
    walk_configurations, BurnInStore, ChainOutcome, ChainStats, MemoryBurnIn, MoveCandidate, SampleBuffer,
    SampleRecord, SamplingParams, UpdatePath, VecSampleBuffer, VmcSampler,
};
pub use io::{ExtractionContext, ExtractionRecord, RunConfig};

#[cfg(test)]
mod tests;
