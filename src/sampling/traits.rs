//! Collaborators of the Metropolis driver: the sample buffer and the burn-in snapshot store.

use serde::{Deserialize, Serialize};

use crate::lattice::ElectronConfiguration;
use crate::wavefunction::ProjectorCounts;

/// A configuration saved after warm-up, together with its projector counts
/// and log amplitude.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub config: ElectronConfiguration,
    pub counts: ProjectorCounts,
    pub log_ip: f64,
}

/// Receives one record per sampled outer step, indexed by sample slot.
pub trait SampleBuffer {
    fn save(&mut self, slot: usize, record: SampleRecord);
}

/// Final configuration of one chain, reused as the start of the next.
pub trait BurnInStore {
    fn save(&mut self, config: &ElectronConfiguration);

    /// The saved configuration, if any chain has finished yet.
    fn load(&self) -> Option<ElectronConfiguration>;
}
