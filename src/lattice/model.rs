//! Lattice model: site count, electrons per spin, local-spin sites and hopping paths.

use serde::{Deserialize, Serialize};
use crate::error::{Result, VmcError};

/// Spin channel of an electron.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Spin {
    Up,
    Down,
}

impl Spin {
    pub const BOTH: [Spin; 2] = [Spin::Up, Spin::Down];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Spin::Up => 0,
            Spin::Down => 1,
        }
    }

    #[inline]
    pub fn flip(self) -> Spin {
        match self {
            Spin::Up => Spin::Down,
            Spin::Down => Spin::Up,
        }
    }
}

/// Static description of the lattice the electrons live on.
///
/// `n_elec` is the number of electrons *per spin channel*, so the
/// configuration holds `2 * n_elec` electrons in total.
#[derive(Clone, Debug)]
pub struct LatticeModel {
    n_site: usize,
    n_elec: usize,
    local_spin: Vec<bool>,
    /// Allowed hopping destinations for each source site
    hopping: Vec<Vec<usize>>,
}

impl LatticeModel {
    /// Create a model with no local-spin sites where every site may hop to every other site.
    pub fn new(n_site: usize, n_elec: usize) -> Result<Self> {
        if n_site == 0 {
            return Err(VmcError::Precondition("lattice must have at least one site".into()));
        }
        if n_elec > n_site {
            return Err(VmcError::Precondition(format!(
                "{} electrons per spin do not fit on {} sites",
                n_elec, n_site
            )));
        }
        let hopping = (0..n_site)
            .map(|ri| (0..n_site).filter(|&rj| rj != ri).collect())
            .collect();
        Ok(Self {
            n_site,
            n_elec,
            local_spin: vec![false; n_site],
            hopping,
        })
    }

    /// Flag sites that must hold exactly one electron.
    pub fn with_local_spin(mut self, flags: Vec<bool>) -> Result<Self> {
        if flags.len() != self.n_site {
            return Err(VmcError::Precondition(format!(
                "local-spin table has {} entries, expected {}",
                flags.len(),
                self.n_site
            )));
        }
        let n_loc = flags.iter().filter(|&&f| f).count();
        let n_total = 2 * self.n_elec;
        if n_loc > n_total || n_total - n_loc > 2 * (self.n_site - n_loc) {
            return Err(VmcError::Precondition(format!(
                "{} local-spin sites are incompatible with {} electrons on {} sites",
                n_loc, n_total, self.n_site
            )));
        }
        self.local_spin = flags;
        Ok(self)
    }

    pub fn with_all_local_spin(self) -> Result<Self> {
        let n = self.n_site;
        self.with_local_spin(vec![true; n])
    }

    /// Replace the hopping path table: `table[ri]` lists the sites an electron on `ri` may hop to.
    pub fn with_hopping_table(mut self, table: Vec<Vec<usize>>) -> Result<Self> {
        if table.len() != self.n_site {
            return Err(VmcError::Precondition(format!(
                "hopping table has {} rows, expected {}",
                table.len(),
                self.n_site
            )));
        }
        for (ri, row) in table.iter().enumerate() {
            if let Some(&rj) = row.iter().find(|&&rj| rj >= self.n_site || rj == ri) {
                return Err(VmcError::Precondition(format!(
                    "invalid hopping path {} -> {}",
                    ri, rj
                )));
            }
        }
        self.hopping = table;
        Ok(self)
    }

    /// Nearest-neighbour hopping on a periodic ring.
    pub fn with_ring_hopping(self) -> Result<Self> {
        let n = self.n_site;
        let table = (0..n)
            .map(|ri| {
                let mut row = vec![(ri + 1) % n, (ri + n - 1) % n];
                row.sort_unstable();
                row.dedup();
                row.retain(|&rj| rj != ri);
                row
            })
            .collect();
        self.with_hopping_table(table)
    }

    /// Nearest-neighbour hopping on an open chain.
    pub fn with_chain_hopping(self) -> Result<Self> {
        let n = self.n_site;
        let table = (0..n)
            .map(|ri| {
                let mut row = Vec::with_capacity(2);
                if ri > 0 {
                    row.push(ri - 1);
                }
                if ri + 1 < n {
                    row.push(ri + 1);
                }
                row
            })
            .collect();
        self.with_hopping_table(table)
    }

    #[inline]
    pub fn n_site(&self) -> usize {
        self.n_site
    }

    #[inline]
    pub fn n_elec(&self) -> usize {
        self.n_elec
    }

    /// Total number of electrons, both spins.
    #[inline]
    pub fn n_size(&self) -> usize {
        2 * self.n_elec
    }

    #[inline]
    pub fn is_local_spin(&self, site: usize) -> bool {
        self.local_spin[site]
    }

    pub fn n_local_spin(&self) -> usize {
        self.local_spin.iter().filter(|&&f| f).count()
    }

    #[inline]
    pub fn hopping_targets(&self, site: usize) -> &[usize] {
        &self.hopping[site]
    }

    /// Exactly one electron per site and every site local-spin.
    pub fn is_half_filled_local_spin(&self) -> bool {
        2 * self.n_elec == self.n_site && self.local_spin.iter().all(|&f| f)
    }

    pub fn require_half_filled_local_spin(&self) -> Result<()> {
        if 2 * self.n_elec != self.n_site {
            return Err(VmcError::Precondition(format!(
                "enumeration only works if every site contains exactly one electron \
                 (2 * n_elec == n_site); have n_elec={}, n_site={}",
                self.n_elec, self.n_site
            )));
        }
        if let Some(ri) = self.local_spin.iter().position(|&f| !f) {
            return Err(VmcError::Precondition(format!(
                "enumeration only works if every site has a local spin; site {} does not",
                ri
            )));
        }
        Ok(())
    }
}
