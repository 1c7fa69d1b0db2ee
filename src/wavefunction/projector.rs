//! Gutzwiller and density-density Jastrow projector counts.

use serde::{Deserialize, Serialize};

use super::traits::Projector;
use crate::error::{Result, VmcError};
use crate::lattice::{ElectronConfiguration, LatticeModel, Spin};

/// Integer statistics over the occupation numbers, one entry per projector parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorCounts(pub Vec<i32>);

/// Trivial projector: no counts, unit weight.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProjector;

impl Projector for NoProjector {
    fn make_counts(&self, _cfg: &ElectronConfiguration) -> ProjectorCounts {
        ProjectorCounts::default()
    }

    fn update_counts(
        &self,
        _from: usize,
        _to: usize,
        _spin: Spin,
        old: &ProjectorCounts,
        _cfg: &ElectronConfiguration,
    ) -> ProjectorCounts {
        old.clone()
    }

    fn log_ratio(&self, _new: &ProjectorCounts, _old: &ProjectorCounts) -> f64 {
        0.0
    }
}

/// Gutzwiller factor on doubly occupied sites times a density-density Jastrow factor.
///
/// P = exp( Σ_g g_g · D_g + Σ_v v_v · N_v ), where D_g counts doubly occupied
/// sites carrying Gutzwiller index g and N_v = Σ n_i n_j over site pairs (i<j)
/// carrying Jastrow index v.
#[derive(Clone, Debug)]
pub struct GutzwillerJastrow {
    gutzwiller_idx: Vec<Option<usize>>,
    jastrow_idx: Vec<Vec<Option<usize>>>,
    n_gutzwiller: usize,
    /// Log-weights: Gutzwiller parameters first, then Jastrow parameters
    params: Vec<f64>,
}

impl GutzwillerJastrow {
    /// # Arguments
    /// * `gutzwiller_idx` - Gutzwiller parameter index per site
    /// * `jastrow_idx` - symmetric site-pair table of Jastrow parameter indices
    /// * `gutzwiller` - Gutzwiller log-weights
    /// * `jastrow` - Jastrow log-weights
    pub fn new(
        gutzwiller_idx: Vec<Option<usize>>,
        jastrow_idx: Vec<Vec<Option<usize>>>,
        gutzwiller: Vec<f64>,
        jastrow: Vec<f64>,
    ) -> Result<Self> {
        let n_site = gutzwiller_idx.len();
        if jastrow_idx.len() != n_site || jastrow_idx.iter().any(|row| row.len() != n_site) {
            return Err(VmcError::Precondition("Jastrow table must be n_site x n_site".into()));
        }
        if gutzwiller_idx.iter().flatten().any(|&g| g >= gutzwiller.len()) {
            return Err(VmcError::Precondition("Gutzwiller index out of range".into()));
        }
        for i in 0..n_site {
            if jastrow_idx[i][i].is_some() {
                return Err(VmcError::Precondition(format!("Jastrow table has an on-site entry at {}", i)));
            }
            for j in 0..n_site {
                if jastrow_idx[i][j] != jastrow_idx[j][i] {
                    return Err(VmcError::Precondition(format!("Jastrow table is not symmetric at ({}, {})", i, j)));
                }
                if jastrow_idx[i][j].is_some_and(|v| v >= jastrow.len()) {
                    return Err(VmcError::Precondition("Jastrow index out of range".into()));
                }
            }
        }
        let n_gutzwiller = gutzwiller.len();
        let mut params = gutzwiller;
        params.extend(jastrow);
        Ok(Self {
            gutzwiller_idx,
            jastrow_idx,
            n_gutzwiller,
            params,
        })
    }

    /// One Gutzwiller parameter `g` shared by all sites and one Jastrow
    /// parameter `v` shared by all pairs connected in the hopping table.
    pub fn uniform(model: &LatticeModel, g: f64, v: f64) -> Result<Self> {
        let n_site = model.n_site();
        let mut jastrow_idx = vec![vec![None; n_site]; n_site];
        for ri in 0..n_site {
            for &rj in model.hopping_targets(ri) {
                jastrow_idx[ri][rj] = Some(0);
                jastrow_idx[rj][ri] = Some(0);
            }
        }
        Self::new(vec![Some(0); n_site], jastrow_idx, vec![g], vec![v])
    }
}

impl Projector for GutzwillerJastrow {
    fn make_counts(&self, cfg: &ElectronConfiguration) -> ProjectorCounts {
        let n_site = cfg.n_site();
        let mut counts = vec![0; self.params.len()];
        for ri in 0..n_site {
            if let Some(g) = self.gutzwiller_idx[ri] {
                counts[g] += i32::from(cfg.occupation(ri, Spin::Up) * cfg.occupation(ri, Spin::Down));
            }
        }
        for ri in 0..n_site {
            let ni = i32::from(cfg.total_occupation(ri));
            for rj in ri + 1..n_site {
                if let Some(v) = self.jastrow_idx[ri][rj] {
                    counts[self.n_gutzwiller + v] += ni * i32::from(cfg.total_occupation(rj));
                }
            }
        }
        ProjectorCounts(counts)
    }

    fn update_counts(
        &self,
        from: usize,
        to: usize,
        spin: Spin,
        old: &ProjectorCounts,
        cfg: &ElectronConfiguration,
    ) -> ProjectorCounts {
        let mut counts = old.0.clone();
        let other = spin.flip();

        // doublon destroyed at `from`, created at `to`
        if let Some(g) = self.gutzwiller_idx[from] {
            counts[g] -= i32::from(cfg.occupation(from, other));
        }
        if let Some(g) = self.gutzwiller_idx[to] {
            counts[g] += i32::from(cfg.occupation(to, other));
        }

        let offset = self.n_gutzwiller;
        for rk in (0..cfg.n_site()).filter(|&rk| rk != from && rk != to) {
            let nk = i32::from(cfg.total_occupation(rk));
            if let Some(v) = self.jastrow_idx[from][rk] {
                counts[offset + v] -= nk;
            }
            if let Some(v) = self.jastrow_idx[to][rk] {
                counts[offset + v] += nk;
            }
        }
        if let Some(v) = self.jastrow_idx[from][to] {
            counts[offset + v] +=
                i32::from(cfg.total_occupation(from)) - i32::from(cfg.total_occupation(to)) + 1;
        }
        ProjectorCounts(counts)
    }

    fn log_ratio(&self, new: &ProjectorCounts, old: &ProjectorCounts) -> f64 {
        self.params
            .iter()
            .zip(new.0.iter().zip(old.0.iter()))
            .map(|(&p, (&n, &o))| p * f64::from(n - o))
            .sum()
    }
}
