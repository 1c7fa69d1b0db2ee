//! In-memory sample buffer and burn-in store.

use super::traits::{BurnInStore, SampleBuffer, SampleRecord};
use crate::lattice::ElectronConfiguration;

/// Fixed number of sample slots, filled by the driver.
#[derive(Clone, Debug, Default)]
pub struct VecSampleBuffer {
    slots: Vec<Option<SampleRecord>>,
}

impl VecSampleBuffer {
    pub fn new(n_sample: usize) -> Self {
        Self {
            slots: vec![None; n_sample],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&SampleRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Number of slots that hold a record.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn records(&self) -> impl Iterator<Item = &SampleRecord> {
        self.slots.iter().flatten()
    }
}

impl SampleBuffer for VecSampleBuffer {
    fn save(&mut self, slot: usize, record: SampleRecord) {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        self.slots[slot] = Some(record);
    }
}

/// Burn-in snapshot kept in process memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryBurnIn {
    config: Option<ElectronConfiguration>,
}

impl MemoryBurnIn {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BurnInStore for MemoryBurnIn {
    fn save(&mut self, config: &ElectronConfiguration) {
        self.config = Some(config.clone());
    }

    fn load(&self) -> Option<ElectronConfiguration> {
        self.config.clone()
    }
}
