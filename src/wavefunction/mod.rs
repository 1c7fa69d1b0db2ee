//! Wavefunction module - amplitude oracles and projector factors.

mod traits;
mod slater;
mod projector;

pub use traits::{AmplitudeOracle, Projector};
pub use slater::{tight_binding_orbitals, LatticeSlater, OrbitalSet};
pub use projector::{GutzwillerJastrow, NoProjector, ProjectorCounts};
