//! Multi-component Slater determinant on a lattice.
//!
//! ψ(x) = Σ_q w_q · det(Φ_q↑[x↑]) · det(Φ_q↓[x↓])
//!
//! where Φ_q is an `n_site × n_elec` orbital matrix and the row of electron `e`
//! in the Slater matrix is the orbital row of the site it occupies.

use std::ops::Range;

use nalgebra::{DMatrix, SymmetricEigen};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::traits::AmplitudeOracle;
use crate::error::{Result, VmcError};
use crate::lattice::{ElectronConfiguration, LatticeModel, Spin};
use crate::parallel::{split_range, Communicator};
use crate::sampling::MoveCandidate;

/// One quasi-particle component: a weight and an orbital matrix per spin.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrbitalSet {
    pub weight: f64,
    /// `n_site × n_elec` orbitals of the up channel
    pub up: DMatrix<f64>,
    /// `n_site × n_elec` orbitals of the down channel
    pub down: DMatrix<f64>,
}

impl OrbitalSet {
    #[inline]
    pub fn orbitals(&self, spin: Spin) -> &DMatrix<f64> {
        match spin {
            Spin::Up => &self.up,
            Spin::Down => &self.down,
        }
    }

    /// Unweighted amplitude of this component evaluated from scratch.
    pub fn amplitude(&self, cfg: &ElectronConfiguration) -> f64 {
        Spin::BOTH
            .iter()
            .map(|&s| slater_matrix(self.orbitals(s), cfg, s).determinant())
            .product()
    }
}

/// Ground-state orbitals of `-t` hopping along the model's path table.
///
/// Returns `n_qp` components of weight `1 / n_qp`. With a nonzero
/// `perturbation`, every orbital entry of every component gets independent
/// Gaussian noise of that width, which lifts degeneracies at the Fermi level.
pub fn tight_binding_orbitals(
    model: &LatticeModel,
    t: f64,
    n_qp: usize,
    perturbation: f64,
    seed: u64,
) -> Result<Vec<OrbitalSet>> {
    let (n_site, n_elec) = (model.n_site(), model.n_elec());
    if n_qp == 0 {
        return Err(VmcError::Precondition("at least one quasi-particle component is required".into()));
    }

    let mut hamiltonian = DMatrix::<f64>::zeros(n_site, n_site);
    for ri in 0..n_site {
        for &rj in model.hopping_targets(ri) {
            hamiltonian[(ri, rj)] = -t;
            hamiltonian[(rj, ri)] = -t;
        }
    }
    let eigen = SymmetricEigen::new(hamiltonian);
    let mut order: Vec<usize> = (0..n_site).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let ground = DMatrix::from_fn(n_site, n_elec, |ri, k| eigen.eigenvectors[(ri, order[k])]);

    let noise = Normal::new(0.0, perturbation.abs())
        .map_err(|e| VmcError::Precondition(format!("orbital perturbation: {}", e)))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let perturbed = |rng: &mut StdRng| {
        DMatrix::from_fn(n_site, n_elec, |ri, k| ground[(ri, k)] + noise.sample(rng))
    };

    let weight = 1.0 / n_qp as f64;
    Ok((0..n_qp)
        .map(|_| OrbitalSet {
            weight,
            up: perturbed(&mut rng),
            down: perturbed(&mut rng),
        })
        .collect())
}

fn slater_matrix(orbitals: &DMatrix<f64>, cfg: &ElectronConfiguration, spin: Spin) -> DMatrix<f64> {
    let n = cfg.n_elec();
    DMatrix::from_fn(n, n, |e, k| orbitals[(cfg.site_of(e, spin), k)])
}

fn invert(matrix: DMatrix<f64>) -> Option<DMatrix<f64>> {
    let det = matrix.determinant();
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    matrix.try_inverse()
}

/// det ratio for replacing row `electron` by the orbital row of `dest`.
fn row_ratio(orbitals: &DMatrix<f64>, inv: &DMatrix<f64>, electron: usize, dest: usize) -> f64 {
    (0..inv.nrows()).map(|k| orbitals[(dest, k)] * inv[(k, electron)]).sum()
}

/// Sherman-Morrison update of `inv` after replacing row `electron`.
fn sherman_morrison(inv: &mut DMatrix<f64>, orbitals: &DMatrix<f64>, electron: usize, dest: usize, ratio: f64) {
    let col = inv.column(electron).clone_owned();
    let u = orbitals.row(dest).clone_owned();
    let mut row = &u * &*inv;
    row[electron] -= 1.0;
    let update = (&col * &row) / ratio;
    *inv -= update;
}

#[derive(Debug, Clone, Default)]
struct SlaterState {
    /// Inverse Slater matrix per spin channel; `None` while singular
    inv: [Option<DMatrix<f64>>; 2],
}

/// [`AmplitudeOracle`] over a worker's share of the [`OrbitalSet`] components.
#[derive(Debug, Clone)]
pub struct LatticeSlater {
    n_site: usize,
    n_elec: usize,
    range: Range<usize>,
    components: Vec<OrbitalSet>,
    states: Vec<SlaterState>,
    amps: Vec<f64>,
}

impl LatticeSlater {
    /// Oracle owning every component.
    pub fn new(components: Vec<OrbitalSet>) -> Result<Self> {
        let n = components.len();
        Self::with_range(components, 0..n)
    }

    /// Oracle owning the contiguous share of `comm`'s rank.
    pub fn partitioned<C: Communicator + ?Sized>(components: Vec<OrbitalSet>, comm: &C) -> Result<Self> {
        let range = split_range(components.len(), comm.rank(), comm.size());
        Self::with_range(components, range)
    }

    fn with_range(mut components: Vec<OrbitalSet>, range: Range<usize>) -> Result<Self> {
        let first = components
            .first()
            .ok_or_else(|| VmcError::Precondition("Slater oracle needs at least one component".into()))?;
        let (n_site, n_elec) = first.up.shape();
        if n_elec == 0 {
            return Err(VmcError::Precondition("Slater oracle needs at least one electron per spin".into()));
        }
        if components
            .iter()
            .any(|c| c.up.shape() != (n_site, n_elec) || c.down.shape() != (n_site, n_elec))
        {
            return Err(VmcError::Precondition("orbital matrices must all be n_site x n_elec".into()));
        }
        let local: Vec<OrbitalSet> = components.drain(range.clone()).collect();
        let n_local = local.len();
        Ok(Self {
            n_site,
            n_elec,
            range,
            components: local,
            states: vec![SlaterState::default(); n_local],
            amps: vec![0.0; n_local],
        })
    }

    pub fn n_site(&self) -> usize {
        self.n_site
    }

    pub fn n_elec(&self) -> usize {
        self.n_elec
    }

    /// Global indices of the components owned by this worker.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    fn movers(candidate: &MoveCandidate, spin: Spin) -> Vec<(usize, usize)> {
        candidate
            .moved_electrons()
            .into_iter()
            .filter(|&(_, s, _)| s == spin)
            .map(|(e, _, dest)| (e, dest))
            .collect()
    }

    /// Determinant ratio of one channel of component `q`, or `None` when it
    /// cannot be obtained from the stored inverse.
    fn channel_ratio(&self, q: usize, spin: Spin, movers: &[(usize, usize)]) -> Option<f64> {
        if movers.is_empty() {
            return Some(1.0);
        }
        let inv = self.states[q].inv[spin.index()].as_ref()?;
        let orbitals = self.components[q].orbitals(spin);
        match movers {
            [(e, dest)] => Some(row_ratio(orbitals, inv, *e, *dest)),
            _ => {
                let mut inv = inv.clone();
                let mut total = 1.0;
                for &(e, dest) in movers {
                    let ratio = row_ratio(orbitals, &inv, e, dest);
                    if ratio == 0.0 || !ratio.is_finite() {
                        return None;
                    }
                    sherman_morrison(&mut inv, orbitals, e, dest, ratio);
                    total *= ratio;
                }
                Some(total)
            }
        }
    }
}

impl AmplitudeOracle for LatticeSlater {
    fn compute_full(&mut self, cfg: &ElectronConfiguration) -> i32 {
        self.components
            .par_iter()
            .zip(self.states.par_iter_mut())
            .zip(self.amps.par_iter_mut())
            .map(|((component, state), amp)| {
                let mut value = 1.0;
                let mut status = 0;
                for spin in Spin::BOTH {
                    let matrix = slater_matrix(component.orbitals(spin), cfg, spin);
                    value *= matrix.determinant();
                    state.inv[spin.index()] = invert(matrix);
                    if state.inv[spin.index()].is_none() {
                        status = 1;
                    }
                }
                *amp = value;
                status
            })
            .max()
            .unwrap_or(0)
    }

    fn amplitudes(&self) -> &[f64] {
        &self.amps
    }

    fn ratio_for_move(&self, candidate: &MoveCandidate, cfg: &ElectronConfiguration) -> Vec<f64> {
        let up = Self::movers(candidate, Spin::Up);
        let down = Self::movers(candidate, Spin::Down);
        (0..self.components.len())
            .map(|q| {
                match (self.channel_ratio(q, Spin::Up, &up), self.channel_ratio(q, Spin::Down, &down)) {
                    (Some(r_up), Some(r_down)) => self.amps[q] * r_up * r_down,
                    _ => self.components[q].amplitude(cfg),
                }
            })
            .collect()
    }

    fn commit(&mut self, candidate: &MoveCandidate, cfg: &ElectronConfiguration, amplitudes: Vec<f64>) {
        for spin in Spin::BOTH {
            let movers = Self::movers(candidate, spin);
            if movers.is_empty() {
                continue;
            }
            for (component, state) in self.components.iter().zip(self.states.iter_mut()) {
                let orbitals = component.orbitals(spin);
                let slot = &mut state.inv[spin.index()];
                let updated = match slot.as_mut() {
                    Some(inv) => movers.iter().all(|&(e, dest)| {
                        let ratio = row_ratio(orbitals, inv, e, dest);
                        if ratio == 0.0 || !ratio.is_finite() {
                            return false;
                        }
                        sherman_morrison(inv, orbitals, e, dest, ratio);
                        true
                    }),
                    None => false,
                };
                if !updated {
                    *slot = invert(slater_matrix(orbitals, cfg, spin));
                }
            }
        }
        self.amps = amplitudes;
    }

    fn local_inner_product(&self, amplitudes: &[f64]) -> f64 {
        self.components
            .iter()
            .zip(amplitudes)
            .map(|(component, &amp)| component.weight * amp)
            .sum()
    }
}
