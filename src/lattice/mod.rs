//! Lattice module - model description, electron configurations and permutation parity.

mod model;
mod configuration;
mod permutation;

pub use model::{LatticeModel, Spin};
pub use configuration::ElectronConfiguration;
pub use permutation::{permutation_sign, MAX_PERMUTATION_LEN};
