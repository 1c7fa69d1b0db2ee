//! Exhaustive walk over all spin arrangements of a half-filled local-spin lattice.
//!
//! The up electrons start packed on the left (sites `0..n_elec`) and the walk
//! visits every placement of them among the `n_site` sites exactly once. Each
//! step exchanges one up and one down electron between two sites; every site
//! strictly between the two is in the same spin state, so the step is a single
//! transposition in the bit pattern of up-occupied sites. Two co-recursive
//! sweeps reduce the problem by one up electron at a time and alternate their
//! direction so consecutive sub-walks join up.

use crate::error::{Result, VmcError};
use crate::lattice::{ElectronConfiguration, Spin};
use super::moves::MoveCandidate;

/// Walk through every arrangement reachable from the packed start.
///
/// `visit` is called once after each exchange with the move and the updated
/// configuration. Returns the number of exchanges performed, which is
/// `C(n_site, n_elec) - 1`.
pub fn walk_configurations<F>(cfg: &mut ElectronConfiguration, visit: F) -> Result<usize>
where
    F: FnMut(&MoveCandidate, &ElectronConfiguration) -> Result<()>,
{
    let (n, k) = (cfg.n_site(), cfg.n_elec());
    let mut walk = Walk { cfg, visit, swaps: 0 };
    if k > 0 && k <= n {
        walk.right(n, k, 0)?;
    }
    Ok(walk.swaps)
}

struct Walk<'c, F> {
    cfg: &'c mut ElectronConfiguration,
    visit: F,
    swaps: usize,
}

impl<F> Walk<'_, F>
where
    F: FnMut(&MoveCandidate, &ElectronConfiguration) -> Result<()>,
{
    fn right(&mut self, n: usize, k: usize, pos: usize) -> Result<()> {
        if k == 1 {
            for p in pos + 1..pos + n {
                self.swap_spins(p, p - 1)?;
            }
            return Ok(());
        }
        for i in 1..=n - k {
            if i % 2 == 1 {
                self.right(n - i, k - 1, pos + i)?;
                self.swap_spins(pos + i - 1, pos + i)?;
            } else {
                self.left(n - i, k - 1, pos + i)?;
                self.swap_spins(pos + i - 1, pos + i + k - 1)?;
            }
        }
        Ok(())
    }

    fn left(&mut self, n: usize, k: usize, pos: usize) -> Result<()> {
        if k == 1 {
            for p in (pos + 1..pos + n).rev() {
                self.swap_spins(p, p - 1)?;
            }
            return Ok(());
        }
        for i in 1..=n - k {
            if i % 2 == 0 {
                self.right(n - i, k - 1, pos)?;
                self.swap_spins(pos + n - i - k, pos + n - i)?;
            } else {
                self.left(n - i, k - 1, pos)?;
                self.swap_spins(pos + n - i - 1, pos + n - i)?;
            }
        }
        Ok(())
    }

    /// Exchange the electron on `ri` with the opposite-spin electron on `rj`.
    fn swap_spins(&mut self, ri: usize, rj: usize) -> Result<()> {
        let spin_a = if self.cfg.electron_at(ri, Spin::Up).is_some() {
            Spin::Up
        } else {
            Spin::Down
        };
        let spin_b = spin_a.flip();
        let missing = |site: usize, spin: Spin| {
            VmcError::Precondition(format!("site {} holds no {:?} electron to exchange", site, spin))
        };
        let electron_a = self.cfg.electron_at(ri, spin_a).ok_or_else(|| missing(ri, spin_a))?;
        let electron_b = self.cfg.electron_at(rj, spin_b).ok_or_else(|| missing(rj, spin_b))?;

        let mv = MoveCandidate::Exchange {
            electron_a,
            site_a: ri,
            electron_b,
            site_b: rj,
            spin_a,
            spin_b,
        };
        self.cfg.apply(&mv);
        self.swaps += 1;
        (self.visit)(&mv, &*self.cfg)
    }
}
