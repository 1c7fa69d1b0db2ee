//! Local move proposals: single-electron hopping and opposite-spin exchange.
//!
//! Proposals never mutate the configuration; they only read it and draw
//! random numbers. A proposal that violates the exclusion constraints is
//! returned as [`Proposal::Rejected`] before any amplitude is evaluated.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::lattice::{ElectronConfiguration, LatticeModel, Spin};

/// Kind of local update attempted in one inner step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    Hopping,
    Exchange,
}

/// Move-type policy deciding which update kind each inner step attempts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePath {
    /// Hopping only
    #[default]
    Hopping,
    /// Hopping or exchange with equal probability
    Mixed,
    /// Exchange only, for pure local-spin models
    Exchange,
}

impl UpdatePath {
    pub fn choose<R: Rng + ?Sized>(self, rng: &mut R) -> UpdateKind {
        match self {
            UpdatePath::Hopping => UpdateKind::Hopping,
            UpdatePath::Mixed => {
                if rng.gen::<f64>() < 0.5 {
                    UpdateKind::Exchange
                } else {
                    UpdateKind::Hopping
                }
            }
            UpdatePath::Exchange => UpdateKind::Exchange,
        }
    }
}

/// A candidate local update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MoveCandidate {
    /// `electron` of spin `spin` hops from site `from` to the empty site `to`.
    Hopping {
        electron: usize,
        from: usize,
        to: usize,
        spin: Spin,
    },
    /// `electron_a` (spin `spin_a`) moves from `site_a` to `site_b` while
    /// `electron_b` (spin `spin_b`) moves from `site_b` to `site_a`.
    Exchange {
        electron_a: usize,
        site_a: usize,
        electron_b: usize,
        site_b: usize,
        spin_a: Spin,
        spin_b: Spin,
    },
}

impl MoveCandidate {
    /// Electrons moved by this candidate as `(electron, spin, destination)`.
    pub fn moved_electrons(&self) -> Vec<(usize, Spin, usize)> {
        match *self {
            MoveCandidate::Hopping { electron, to, spin, .. } => vec![(electron, spin, to)],
            MoveCandidate::Exchange { electron_a, site_a, electron_b, site_b, spin_a, spin_b } => {
                vec![(electron_a, spin_a, site_b), (electron_b, spin_b, site_a)]
            }
        }
    }
}

/// Outcome of a proposal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Proposal {
    Candidate(MoveCandidate),
    /// No legal move exists for the current draw
    Rejected,
}

impl Proposal {
    pub fn candidate(self) -> Option<MoveCandidate> {
        match self {
            Proposal::Candidate(mv) => Some(mv),
            Proposal::Rejected => None,
        }
    }
}

pub fn propose<R: Rng + ?Sized>(
    kind: UpdateKind,
    model: &LatticeModel,
    cfg: &ElectronConfiguration,
    rng: &mut R,
) -> Proposal {
    match kind {
        UpdateKind::Hopping => propose_hopping(model, cfg, rng),
        UpdateKind::Exchange => propose_exchange(cfg, rng),
    }
}

/// Pick an itinerant electron and an empty destination allowed by the path table.
pub fn propose_hopping<R: Rng + ?Sized>(
    model: &LatticeModel,
    cfg: &ElectronConfiguration,
    rng: &mut R,
) -> Proposal {
    let movers: Vec<(usize, Spin)> = Spin::BOTH
        .iter()
        .flat_map(|&s| (0..cfg.n_elec()).map(move |mi| (mi, s)))
        .filter(|&(mi, s)| !model.is_local_spin(cfg.site_of(mi, s)))
        .collect();
    let Some(&(electron, spin)) = movers.choose(rng) else {
        return Proposal::Rejected;
    };

    let from = cfg.site_of(electron, spin);
    let targets: Vec<usize> = model
        .hopping_targets(from)
        .iter()
        .copied()
        .filter(|&rj| cfg.electron_at(rj, spin).is_none() && !model.is_local_spin(rj))
        .collect();
    match targets.choose(rng) {
        Some(&to) => Proposal::Candidate(MoveCandidate::Hopping { electron, from, to, spin }),
        None => Proposal::Rejected,
    }
}

/// Pick two singly occupied sites carrying opposite spins and swap them.
pub fn propose_exchange<R: Rng + ?Sized>(cfg: &ElectronConfiguration, rng: &mut R) -> Proposal {
    if !(0..cfg.n_site()).any(|ri| cfg.total_occupation(ri) == 1) {
        return Proposal::Rejected;
    }

    let lonely = |mi: usize, s: Spin| cfg.electron_at(cfg.site_of(mi, s), s.flip()).is_none();
    let firsts: Vec<(usize, Spin)> = Spin::BOTH
        .iter()
        .flat_map(|&s| (0..cfg.n_elec()).map(move |mi| (mi, s)))
        .filter(|&(mi, s)| lonely(mi, s))
        .collect();
    let Some(&(electron_a, spin_a)) = firsts.choose(rng) else {
        return Proposal::Rejected;
    };

    let spin_b = spin_a.flip();
    let seconds: Vec<usize> = (0..cfg.n_elec()).filter(|&mj| lonely(mj, spin_b)).collect();
    let Some(&electron_b) = seconds.choose(rng) else {
        return Proposal::Rejected;
    };

    Proposal::Candidate(MoveCandidate::Exchange {
        electron_a,
        site_a: cfg.site_of(electron_a, spin_a),
        electron_b,
        site_b: cfg.site_of(electron_b, spin_b),
        spin_a,
        spin_b,
    })
}
