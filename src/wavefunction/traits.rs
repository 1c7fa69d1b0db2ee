//! Wave function traits consumed by the sampler.
//!
//! Provides `AmplitudeOracle` for the matrix part of the trial wave function
//! and `Projector` for the correlation factor evaluated from occupation counts.

use crate::error::Result;
use crate::lattice::{ElectronConfiguration, Spin};
use crate::parallel::Communicator;
use crate::sampling::MoveCandidate;
use super::projector::ProjectorCounts;

/// Amplitude of the trial wave function, kept in an internal matrix
/// representation that is updated incrementally as electrons move.
///
/// The amplitude is a vector of quasi-particle components. A worker only
/// holds its own contiguous slice of them; the full value is the weighted
/// sum of all components across workers.
pub trait AmplitudeOracle {
    /// Recompute the internal representation from scratch.
    ///
    /// Returns a status flag: `0` on success, nonzero if the configuration is
    /// numerically singular.
    fn compute_full(&mut self, cfg: &ElectronConfiguration) -> i32;

    /// Currently installed amplitude components of this worker.
    fn amplitudes(&self) -> &[f64];

    /// Amplitude components for the tentative state `cfg`, which already has
    /// `candidate` applied. Nothing is committed.
    fn ratio_for_move(&self, candidate: &MoveCandidate, cfg: &ElectronConfiguration) -> Vec<f64>;

    /// Fold an accepted move into the internal representation.
    ///
    /// `amplitudes` is the result of [`ratio_for_move`](Self::ratio_for_move)
    /// for the same candidate.
    fn commit(&mut self, candidate: &MoveCandidate, cfg: &ElectronConfiguration, amplitudes: Vec<f64>);

    /// This worker's weighted contribution to the inner product.
    fn local_inner_product(&self, amplitudes: &[f64]) -> f64;

    /// Inner product summed over all workers of `comm`.
    fn inner_product<C: Communicator + ?Sized>(&self, amplitudes: &[f64], comm: &C) -> Result<f64> {
        comm.all_reduce_sum(self.local_inner_product(amplitudes))
    }
}

/// Correlation factor of the trial wave function expressed through integer
/// counts over the occupation numbers.
pub trait Projector {
    /// Counts for `cfg` computed from scratch.
    fn make_counts(&self, cfg: &ElectronConfiguration) -> ProjectorCounts;

    /// Counts after one electron of spin `spin` hopped from `from` to `to`.
    /// `cfg` already reflects the hop.
    fn update_counts(
        &self,
        from: usize,
        to: usize,
        spin: Spin,
        old: &ProjectorCounts,
        cfg: &ElectronConfiguration,
    ) -> ProjectorCounts;

    /// Logarithm of the projector ratio between `new` and `old` counts.
    fn log_ratio(&self, new: &ProjectorCounts, old: &ProjectorCounts) -> f64;

    /// Apply `candidate` to `cfg` and return the counts of the new state.
    ///
    /// An exchange is applied as two successive hops so each count update
    /// sees the occupations it expects.
    fn apply_move(
        &self,
        cfg: &mut ElectronConfiguration,
        candidate: &MoveCandidate,
        old: &ProjectorCounts,
    ) -> ProjectorCounts {
        match *candidate {
            MoveCandidate::Hopping { electron, from, to, spin } => {
                cfg.hop(electron, from, to, spin);
                self.update_counts(from, to, spin, old, cfg)
            }
            MoveCandidate::Exchange { electron_a, site_a, electron_b, site_b, spin_a, spin_b } => {
                cfg.hop(electron_a, site_a, site_b, spin_a);
                let half = self.update_counts(site_a, site_b, spin_a, old, cfg);
                cfg.hop(electron_b, site_b, site_a, spin_b);
                self.update_counts(site_b, site_a, spin_b, &half, cfg)
            }
        }
    }
}
