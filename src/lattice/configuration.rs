//! Electron configuration on the lattice and its in-place move operations.
//!
//! The same physical state is kept in two mutually inverse views:
//! - `ele_idx[e + s * n_elec]`: site of electron `e` with spin `s`
//! - `ele_cfg[r + s * n_site]`: electron on site `r` with spin `s`, if any
//!
//! plus the occupation numbers `ele_num`, derived from `ele_cfg`.

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::model::{LatticeModel, Spin};
use crate::error::{Result, VmcError};
use crate::sampling::MoveCandidate;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectronConfiguration {
    n_site: usize,
    n_elec: usize,
    ele_idx: Vec<usize>,
    ele_cfg: Vec<Option<usize>>,
    ele_num: Vec<u8>,
}

impl ElectronConfiguration {
    fn from_parts(n_site: usize, n_elec: usize, ele_idx: Vec<usize>, ele_cfg: Vec<Option<usize>>) -> Self {
        let mut cfg = Self {
            n_site,
            n_elec,
            ele_idx,
            ele_cfg,
            ele_num: vec![0; 2 * n_site],
        };
        cfg.refresh_occupation();
        cfg
    }

    /// Build a configuration from explicit site lists: up electron `e` sits on
    /// `up_sites[e]`, down electron `e` on `down_sites[e]`.
    pub fn from_sites(model: &LatticeModel, up_sites: &[usize], down_sites: &[usize]) -> Result<Self> {
        let (n_site, n_elec) = (model.n_site(), model.n_elec());
        if up_sites.len() != n_elec || down_sites.len() != n_elec {
            return Err(VmcError::Precondition(format!(
                "expected {} electrons per spin, got {} up and {} down",
                n_elec,
                up_sites.len(),
                down_sites.len()
            )));
        }
        let mut ele_cfg = vec![None; 2 * n_site];
        for (s, sites) in [up_sites, down_sites].into_iter().enumerate() {
            for (mi, &ri) in sites.iter().enumerate() {
                if ri >= n_site || ele_cfg[ri + s * n_site].is_some() {
                    return Err(VmcError::Precondition(format!(
                        "site {} cannot take electron {} of spin channel {}",
                        ri, mi, s
                    )));
                }
                ele_cfg[ri + s * n_site] = Some(mi);
            }
        }
        let ele_idx = up_sites.iter().chain(down_sites.iter()).copied().collect();
        Ok(Self::from_parts(n_site, n_elec, ele_idx, ele_cfg))
    }

    /// Random configuration honouring the local-spin constraint.
    ///
    /// Every local-spin site receives one randomly chosen (electron, spin);
    /// the remaining electrons go to random empty itinerant sites. Returns
    /// `None` when an electron finds no free site in its spin channel.
    pub fn random<R: Rng + ?Sized>(model: &LatticeModel, rng: &mut R) -> Option<Self> {
        let (n_site, n_elec) = (model.n_site(), model.n_elec());
        let mut idx: Vec<Option<usize>> = vec![None; 2 * n_elec];
        let mut ele_cfg: Vec<Option<usize>> = vec![None; 2 * n_site];

        for ri in (0..n_site).filter(|&ri| model.is_local_spin(ri)) {
            let free: Vec<usize> = (0..2 * n_elec).filter(|&msi| idx[msi].is_none()).collect();
            let &msi = free.choose(rng)?;
            let s = msi / n_elec;
            ele_cfg[ri + s * n_site] = Some(msi % n_elec);
            idx[msi] = Some(ri);
        }

        for s in 0..2 {
            for mi in 0..n_elec {
                let msi = mi + s * n_elec;
                if idx[msi].is_some() {
                    continue;
                }
                let free: Vec<usize> = (0..n_site)
                    .filter(|&ri| ele_cfg[ri + s * n_site].is_none() && !model.is_local_spin(ri))
                    .collect();
                let &ri = free.choose(rng)?;
                ele_cfg[ri + s * n_site] = Some(mi);
                idx[msi] = Some(ri);
            }
        }

        let ele_idx = idx.into_iter().collect::<Option<Vec<_>>>()?;
        Some(Self::from_parts(n_site, n_elec, ele_idx, ele_cfg))
    }

    /// Half-filled start for enumeration: up electrons fill the left half of the
    /// lattice in order, down electrons the right half.
    pub fn half_filled_ordered(model: &LatticeModel) -> Result<Self> {
        model.require_half_filled_local_spin()?;
        let n_elec = model.n_elec();
        let up: Vec<usize> = (0..n_elec).collect();
        let down: Vec<usize> = (n_elec..2 * n_elec).collect();
        Self::from_sites(model, &up, &down)
    }

    /// Rederive the occupation numbers from `ele_cfg`.
    pub fn refresh_occupation(&mut self) {
        self.ele_num
            .par_iter_mut()
            .zip(self.ele_cfg.par_iter())
            .for_each(|(num, cfg)| *num = u8::from(cfg.is_some()));
    }

    #[inline]
    pub fn n_site(&self) -> usize {
        self.n_site
    }

    #[inline]
    pub fn n_elec(&self) -> usize {
        self.n_elec
    }

    #[inline]
    pub fn ele_idx(&self) -> &[usize] {
        &self.ele_idx
    }

    #[inline]
    pub fn ele_cfg(&self) -> &[Option<usize>] {
        &self.ele_cfg
    }

    #[inline]
    pub fn ele_num(&self) -> &[u8] {
        &self.ele_num
    }

    #[inline]
    pub fn site_of(&self, electron: usize, spin: Spin) -> usize {
        self.ele_idx[electron + spin.index() * self.n_elec]
    }

    #[inline]
    pub fn electron_at(&self, site: usize, spin: Spin) -> Option<usize> {
        self.ele_cfg[site + spin.index() * self.n_site]
    }

    #[inline]
    pub fn occupation(&self, site: usize, spin: Spin) -> u8 {
        self.ele_num[site + spin.index() * self.n_site]
    }

    /// Total number of electrons on `site`, both spins.
    #[inline]
    pub fn total_occupation(&self, site: usize) -> u8 {
        self.ele_num[site] + self.ele_num[site + self.n_site]
    }

    /// Sites (ascending) occupied in spin channel `spin`.
    pub fn occupied_sites(&self, spin: Spin) -> Vec<usize> {
        (0..self.n_site).filter(|&ri| self.occupation(ri, spin) == 1).collect()
    }

    /// The `electron` of spin `spin` hops from `from` to `to`.
    pub fn hop(&mut self, electron: usize, from: usize, to: usize, spin: Spin) {
        let (s, n_site) = (spin.index(), self.n_site);
        self.ele_idx[electron + s * self.n_elec] = to;
        self.ele_cfg[from + s * n_site] = None;
        self.ele_cfg[to + s * n_site] = Some(electron);
        self.ele_num[from + s * n_site] = 0;
        self.ele_num[to + s * n_site] = 1;
    }

    /// Exact inverse of [`hop`](Self::hop) with the same arguments.
    pub fn unhop(&mut self, electron: usize, from: usize, to: usize, spin: Spin) {
        let (s, n_site) = (spin.index(), self.n_site);
        self.ele_idx[electron + s * self.n_elec] = from;
        self.ele_cfg[from + s * n_site] = Some(electron);
        self.ele_cfg[to + s * n_site] = None;
        self.ele_num[from + s * n_site] = 1;
        self.ele_num[to + s * n_site] = 0;
    }

    /// Tentatively apply a move in place.
    pub fn apply(&mut self, candidate: &MoveCandidate) {
        match *candidate {
            MoveCandidate::Hopping { electron, from, to, spin } => self.hop(electron, from, to, spin),
            MoveCandidate::Exchange { electron_a, site_a, electron_b, site_b, spin_a, spin_b } => {
                self.hop(electron_a, site_a, site_b, spin_a);
                self.hop(electron_b, site_b, site_a, spin_b);
            }
        }
    }

    /// Undo [`apply`](Self::apply), restoring the previous state exactly.
    pub fn revert(&mut self, candidate: &MoveCandidate) {
        match *candidate {
            MoveCandidate::Hopping { electron, from, to, spin } => self.unhop(electron, from, to, spin),
            MoveCandidate::Exchange { electron_a, site_a, electron_b, site_b, spin_a, spin_b } => {
                self.unhop(electron_b, site_b, site_a, spin_b);
                self.unhop(electron_a, site_a, site_b, spin_a);
            }
        }
    }

    /// Bit `p` is set iff site `p` has no up electron.
    ///
    /// Only meaningful when every site holds at least one electron; a site
    /// empty in both channels is reported as a corrupted configuration.
    pub fn spin_bits(&self) -> Result<u64> {
        if self.n_site > 64 {
            return Err(VmcError::LatticeTooLarge { n_site: self.n_site });
        }
        let mut bits = 0u64;
        for ri in 0..self.n_site {
            match (self.electron_at(ri, Spin::Up), self.electron_at(ri, Spin::Down)) {
                (None, None) => {
                    return Err(VmcError::Precondition(format!(
                        "incorrect spin configuration: site {} is empty in both spin channels",
                        ri
                    )))
                }
                (up, _) => bits |= u64::from(up.is_none()) << ri,
            }
        }
        Ok(bits)
    }

    /// Verify the mutual-inverse and occupancy invariants against `model`.
    pub fn check_invariants(&self, model: &LatticeModel) -> Result<()> {
        let broken = |msg: String| Err(VmcError::Precondition(msg));
        for spin in Spin::BOTH {
            for mi in 0..self.n_elec {
                let ri = self.site_of(mi, spin);
                if ri >= self.n_site || self.electron_at(ri, spin) != Some(mi) {
                    return broken(format!("electron {} ({:?}) is not where ele_idx says", mi, spin));
                }
            }
            for ri in 0..self.n_site {
                if let Some(mi) = self.electron_at(ri, spin) {
                    if mi >= self.n_elec || self.site_of(mi, spin) != ri {
                        return broken(format!("site {} ({:?}) points at a stray electron", ri, spin));
                    }
                }
                if self.occupation(ri, spin) != u8::from(self.electron_at(ri, spin).is_some()) {
                    return broken(format!("occupation of site {} ({:?}) is stale", ri, spin));
                }
            }
        }
        for ri in (0..self.n_site).filter(|&ri| model.is_local_spin(ri)) {
            if self.total_occupation(ri) != 1 {
                return broken(format!(
                    "local-spin site {} holds {} electrons",
                    ri,
                    self.total_occupation(ri)
                ));
            }
        }
        Ok(())
    }
}
