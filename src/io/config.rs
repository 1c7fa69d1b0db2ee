//! YAML run configuration.
//!
//! ```yaml
//! lattice:
//!   n_site: 8
//!   n_elec: 4
//!   local_spin: all
//!   hopping: ring
//! sampling:
//!   n_warm_up: 200
//!   n_sample: 500
//!   update_path: exchange
//! wavefunction:
//!   n_qp: 4
//! projector:
//!   gutzwiller: -0.5
//! workers: 2
//! ```
//!
//! Every field has a default. The extraction section can be overridden from
//! the environment with `EXTRACT_WAVEFUNCTION=<path>` and
//! `EXTRACT_WAVEFUNCTION_WALK=1`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::lattice::LatticeModel;
use crate::sampling::{SamplingParams, UpdatePath};

pub const EXTRACT_PATH_VAR: &str = "EXTRACT_WAVEFUNCTION";
pub const EXTRACT_WALK_VAR: &str = "EXTRACT_WAVEFUNCTION_WALK";

/// Which sites carry a local spin.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocalSpinSpec {
    #[default]
    None,
    All,
    Sites(Vec<usize>),
}

/// Hopping path table.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoppingSpec {
    /// Every site to every other site
    #[default]
    All,
    Ring,
    Chain,
    Table(Vec<Vec<usize>>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LatticeConfig {
    pub n_site: usize,
    /// Electrons per spin channel
    pub n_elec: usize,
    pub local_spin: LocalSpinSpec,
    pub hopping: HoppingSpec,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            n_site: 4,
            n_elec: 2,
            local_spin: LocalSpinSpec::None,
            hopping: HoppingSpec::All,
        }
    }
}

impl LatticeConfig {
    pub fn build(&self) -> Result<LatticeModel> {
        let model = LatticeModel::new(self.n_site, self.n_elec)?;
        let model = match &self.local_spin {
            LocalSpinSpec::None => model,
            LocalSpinSpec::All => model.with_all_local_spin()?,
            LocalSpinSpec::Sites(sites) => {
                let mut flags = vec![false; self.n_site];
                for &ri in sites {
                    if let Some(flag) = flags.get_mut(ri) {
                        *flag = true;
                    } else {
                        return Err(VmcError::Precondition(format!(
                            "local-spin site {} is outside the lattice",
                            ri
                        )));
                    }
                }
                model.with_local_spin(flags)?
            }
        };
        match &self.hopping {
            HoppingSpec::All => Ok(model),
            HoppingSpec::Ring => model.with_ring_hopping(),
            HoppingSpec::Chain => model.with_chain_hopping(),
            HoppingSpec::Table(table) => model.with_hopping_table(table.clone()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub n_warm_up: usize,
    pub n_sample: usize,
    pub n_interval: usize,
    pub update_path: UpdatePath,
    pub recalibration_interval: Option<usize>,
    pub seed: u64,
    /// Chains run one after another, sharing the burn-in snapshot
    pub n_chains: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let params = SamplingParams::default();
        Self {
            n_warm_up: params.n_warm_up,
            n_sample: params.n_sample,
            n_interval: params.n_interval,
            update_path: params.update_path,
            recalibration_interval: params.recalibration_interval,
            seed: 12345,
            n_chains: 1,
        }
    }
}

impl SamplingConfig {
    pub fn params(&self) -> SamplingParams {
        SamplingParams {
            n_warm_up: self.n_warm_up,
            n_sample: self.n_sample,
            n_interval: self.n_interval,
            update_path: self.update_path,
            recalibration_interval: self.recalibration_interval,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WavefunctionConfig {
    /// Hopping amplitude of the tight-binding orbitals
    pub hopping: f64,
    /// Number of quasi-particle components
    pub n_qp: usize,
    /// Width of the Gaussian noise added to each component's orbitals
    pub perturbation: f64,
    pub seed: u64,
}

impl Default for WavefunctionConfig {
    fn default() -> Self {
        Self {
            hopping: 1.0,
            n_qp: 1,
            perturbation: 0.1,
            seed: 2024,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ProjectorConfig {
    pub gutzwiller: f64,
    /// Density-density Jastrow weight on hopping bonds
    pub jastrow_nn: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub path: Option<PathBuf>,
    pub enumerate: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub lattice: LatticeConfig,
    pub sampling: SamplingConfig,
    pub wavefunction: WavefunctionConfig,
    pub projector: ProjectorConfig,
    pub extraction: ExtractionConfig,
    pub workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lattice: LatticeConfig::default(),
            sampling: SamplingConfig::default(),
            wavefunction: WavefunctionConfig::default(),
            projector: ProjectorConfig::default(),
            extraction: ExtractionConfig::default(),
            workers: 1,
        }
    }
}

/// `1`, `true`, `yes` and `on` (any case) switch a flag on.
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply the extraction environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply extraction overrides looked up through `lookup`.
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(path) = lookup(EXTRACT_PATH_VAR).filter(|p| !p.is_empty()) {
            self.extraction.path = Some(PathBuf::from(path));
        }
        if let Some(flag) = lookup(EXTRACT_WALK_VAR) {
            self.extraction.enumerate = parse_flag(&flag);
        }
    }
}
