//! Metropolis driver for lattice Variational Monte Carlo.
//!
//! One chain walks through `Initializing → WarmingUp → Sampling → Finalizing`.
//! Every worker of a group runs the same chain in lock-step: they share the
//! random stream and see identical reduced inner products, so every accept or
//! reject decision and every configuration update is replicated.

use std::fmt;

use log::{debug, info, warn};
use rand::Rng;

use super::moves::{propose, MoveCandidate, UpdateKind, UpdatePath};
use super::traits::{BurnInStore, SampleBuffer, SampleRecord};
use super::walk::walk_configurations;
use crate::error::{Result, VmcError};
use crate::io::ExtractionContext;
use crate::lattice::{ElectronConfiguration, LatticeModel};
use crate::parallel::Communicator;
use crate::wavefunction::{AmplitudeOracle, Projector, ProjectorCounts};

/// Attempts at building a non-singular random initial configuration.
pub const MAX_INITIAL_ATTEMPTS: usize = 100;

/// Parameters for one Markov chain.
#[derive(Copy, Clone, Debug)]
pub struct SamplingParams {
    /// Outer steps discarded before sampling
    pub n_warm_up: usize,
    /// Outer steps saved into the sample buffer
    pub n_sample: usize,
    /// Inner steps per outer step, in units of `n_site`
    pub n_interval: usize,
    pub update_path: UpdatePath,
    /// Accepted moves tolerated between full recomputations; `None` means `n_site`
    pub recalibration_interval: Option<usize>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            n_warm_up: 100,
            n_sample: 100,
            n_interval: 1,
            update_path: UpdatePath::Hopping,
            recalibration_interval: None,
        }
    }
}

impl SamplingParams {
    pub fn with_warm_up(mut self, n_warm_up: usize) -> Self {
        self.n_warm_up = n_warm_up;
        self
    }

    pub fn with_samples(mut self, n_sample: usize) -> Self {
        self.n_sample = n_sample;
        self
    }

    pub fn with_interval(mut self, n_interval: usize) -> Self {
        self.n_interval = n_interval;
        self
    }

    pub fn with_update_path(mut self, update_path: UpdatePath) -> Self {
        self.update_path = update_path;
        self
    }

    pub fn with_recalibration_interval(mut self, interval: usize) -> Self {
        self.recalibration_interval = Some(interval);
        self
    }
}

/// Counters for one move kind.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveStats {
    /// Inner steps that chose this kind
    pub proposed: usize,
    /// Proposals that were not rejected outright and got an amplitude
    pub evaluated: usize,
    pub accepted: usize,
}

impl MoveStats {
    /// Accepted fraction of the evaluated proposals.
    pub fn acceptance(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.accepted as f64 / self.evaluated as f64
        }
    }
}

/// Statistics of one sampled chain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub hopping: MoveStats,
    pub exchange: MoveStats,
    /// Full recomputations forced by the accepted-move threshold
    pub recalibrations: usize,
    pub outer_steps: usize,
    pub samples_saved: usize,
    /// Whether the chain started from the burn-in snapshot
    pub restored: bool,
}

impl ChainStats {
    fn kind_mut(&mut self, kind: UpdateKind) -> &mut MoveStats {
        match kind {
            UpdateKind::Hopping => &mut self.hopping,
            UpdateKind::Exchange => &mut self.exchange,
        }
    }

    pub fn accepted(&self) -> usize {
        self.hopping.accepted + self.exchange.accepted
    }
}

/// What a chain produced.
#[derive(Clone, Debug, PartialEq)]
pub enum ChainOutcome {
    Sampled { stats: ChainStats, final_log_ip: f64 },
    /// Exhaustive walk; the process is expected to stop afterwards
    Enumerated { records: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChainPhase {
    Initializing,
    WarmingUp,
    Sampling,
    Finalizing,
}

impl fmt::Display for ChainPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainPhase::Initializing => "initializing",
            ChainPhase::WarmingUp => "warming up",
            ChainPhase::Sampling => "sampling",
            ChainPhase::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// Metropolis weight `exp(2 (Δ log P + Δ log |ψ|))`; non-finite weights become `-1`.
pub fn metropolis_weight(log_projector_ratio: f64, log_amplitude_ratio: f64) -> f64 {
    let w = (2.0 * (log_projector_ratio + log_amplitude_ratio)).exp();
    if w.is_finite() {
        w
    } else {
        -1.0
    }
}

/// Current point of the chain.
struct ChainState {
    cfg: ElectronConfiguration,
    counts: ProjectorCounts,
    log_ip: f64,
}

impl ChainState {
    fn checked(self) -> Result<Self> {
        if self.log_ip.is_finite() {
            Ok(self)
        } else {
            Err(VmcError::NonFiniteAmplitude { log_ip: self.log_ip })
        }
    }
}

/// Markov chain sampler over electron configurations.
pub struct VmcSampler<O, P, C> {
    model: LatticeModel,
    params: SamplingParams,
    oracle: O,
    projector: P,
    comm: C,
}

impl<O, P, C> VmcSampler<O, P, C>
where
    O: AmplitudeOracle,
    P: Projector,
    C: Communicator,
{
    pub fn new(model: LatticeModel, params: SamplingParams, oracle: O, projector: P, comm: C) -> Self {
        Self {
            model,
            params,
            oracle,
            projector,
            comm,
        }
    }

    pub fn model(&self) -> &LatticeModel {
        &self.model
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Inner product of the whole group for `amplitudes`.
    fn inner_product(&self, amplitudes: &[f64]) -> Result<f64> {
        self.oracle.inner_product(amplitudes, &self.comm)
    }

    fn enter(&self, phase: ChainPhase) {
        if self.comm.is_root() {
            info!("chain: {}", phase);
        }
    }

    /// Adopt `cfg` whose amplitude state was just recomputed from scratch.
    fn settle(&mut self, cfg: ElectronConfiguration, extraction: &mut ExtractionContext) -> Result<ChainState> {
        let counts = self.projector.make_counts(&cfg);
        let ip = self.inner_product(self.oracle.amplitudes())?;
        extraction.record(&cfg, ip)?;
        Ok(ChainState {
            cfg,
            counts,
            log_ip: ip.abs().ln(),
        })
    }

    fn recompute(&mut self, cfg: ElectronConfiguration, extraction: &mut ExtractionContext) -> Result<ChainState> {
        self.oracle.compute_full(&cfg);
        self.settle(cfg, extraction)
    }

    /// Random start whose amplitude state is non-singular on every worker.
    fn fresh_sample<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        extraction: &mut ExtractionContext,
    ) -> Result<ChainState> {
        for attempt in 1..=MAX_INITIAL_ATTEMPTS {
            let candidate = ElectronConfiguration::random(&self.model, rng);
            let local = match &candidate {
                Some(cfg) => self.oracle.compute_full(cfg),
                None => 1,
            };
            let status = self.comm.all_reduce_max(local)?;
            if let (0, Some(cfg)) = (status, candidate) {
                return self.settle(cfg, extraction);
            }
            debug!("initial sample attempt {} failed", attempt);
        }
        Err(VmcError::InitialSampleExhausted {
            attempts: MAX_INITIAL_ATTEMPTS,
        })
    }

    /// Starting point of a sampling chain and whether it came from the
    /// burn-in snapshot. A non-finite amplitude is resampled exactly once; the
    /// resampled start is fresh and needs the full warm-up.
    fn initial_state<R: Rng + ?Sized, S: BurnInStore + ?Sized>(
        &mut self,
        rng: &mut R,
        burn_in: &S,
        extraction: &mut ExtractionContext,
    ) -> Result<(ChainState, bool)> {
        let (state, restored) = match burn_in.load() {
            Some(cfg) => {
                cfg.check_invariants(&self.model)?;
                (self.recompute(cfg, extraction)?, true)
            }
            None => (self.fresh_sample(rng, extraction)?, false),
        };
        match state.checked() {
            Ok(state) => Ok((state, restored)),
            Err(err) if err.is_recoverable() => {
                if self.comm.is_root() {
                    warn!("{}; remaking the initial sample", err);
                }
                let state = self.fresh_sample(rng, extraction)?;
                let log_ip = state.log_ip;
                let state = state.checked().map_err(|_| VmcError::Degenerate { log_ip })?;
                Ok((state, false))
            }
            Err(err) => Err(err),
        }
    }

    /// Run one chain.
    ///
    /// With enumeration enabled on `extraction`, the chain is replaced by the
    /// exhaustive walk and no samples are produced.
    pub fn make_sample<R, B, S>(
        &mut self,
        rng: &mut R,
        buffer: &mut B,
        burn_in: &mut S,
        extraction: &mut ExtractionContext,
    ) -> Result<ChainOutcome>
    where
        R: Rng + ?Sized,
        B: SampleBuffer + ?Sized,
        S: BurnInStore + ?Sized,
    {
        self.enter(ChainPhase::Initializing);
        if extraction.should_enumerate() {
            let records = self.enumerate(extraction)?;
            extraction.flush()?;
            return Ok(ChainOutcome::Enumerated { records });
        }

        let (mut state, restored) = self.initial_state(rng, burn_in, extraction)?;
        let n_site = self.model.n_site();
        let n_sample = self.params.n_sample;
        let n_out = if restored {
            n_sample + 1
        } else {
            self.params.n_warm_up + n_sample
        };
        let n_in = self.params.n_interval * n_site;
        let first_sample = n_out - n_sample;
        let threshold = self.params.recalibration_interval.unwrap_or(n_site);

        if self.comm.is_root() {
            info!(
                "chain: {} outer x {} inner steps, {} samples, restored = {}, log|ψ| = {:.6}",
                n_out, n_in, n_sample, restored, state.log_ip
            );
        }

        let mut stats = ChainStats {
            restored,
            ..ChainStats::default()
        };
        let mut n_accept = 0;
        let mut phase = ChainPhase::Initializing;

        for out_step in 0..n_out {
            let next = if out_step < first_sample {
                ChainPhase::WarmingUp
            } else {
                ChainPhase::Sampling
            };
            if next != phase {
                phase = next;
                self.enter(phase);
            }

            for _ in 0..n_in {
                if self.step(rng, &mut state, &mut stats, extraction)? {
                    n_accept += 1;
                }
                if n_accept > threshold {
                    self.oracle.compute_full(&state.cfg);
                    let ip = self.inner_product(self.oracle.amplitudes())?;
                    extraction.record(&state.cfg, ip)?;
                    debug!(
                        "recalibrated after {} accepted moves: log|ψ| {:.12} -> {:.12}",
                        n_accept,
                        state.log_ip,
                        ip.abs().ln()
                    );
                    state.log_ip = ip.abs().ln();
                    stats.recalibrations += 1;
                    n_accept = 0;
                }
            }

            if out_step >= first_sample {
                buffer.save(
                    out_step - first_sample,
                    SampleRecord {
                        config: state.cfg.clone(),
                        counts: state.counts.clone(),
                        log_ip: state.log_ip,
                    },
                );
                stats.samples_saved += 1;
            }
            stats.outer_steps += 1;
        }

        self.enter(ChainPhase::Finalizing);
        burn_in.save(&state.cfg);
        extraction.flush()?;
        if self.comm.is_root() {
            info!(
                "chain: accepted {}/{} hopping, {}/{} exchange, {} recalibrations",
                stats.hopping.accepted,
                stats.hopping.evaluated,
                stats.exchange.accepted,
                stats.exchange.evaluated,
                stats.recalibrations
            );
        }
        Ok(ChainOutcome::Sampled {
            stats,
            final_log_ip: state.log_ip,
        })
    }

    /// One inner Metropolis step. Returns whether a move was accepted.
    fn step<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        state: &mut ChainState,
        stats: &mut ChainStats,
        extraction: &mut ExtractionContext,
    ) -> Result<bool> {
        let kind = self.params.update_path.choose(rng);
        stats.kind_mut(kind).proposed += 1;
        let Some(candidate) = propose(kind, &self.model, &state.cfg, rng).candidate() else {
            return Ok(false);
        };

        let counts = self.projector.apply_move(&mut state.cfg, &candidate, &state.counts);
        let amplitudes = self.oracle.ratio_for_move(&candidate, &state.cfg);
        let ip = self.inner_product(&amplitudes)?;
        let log_ip = ip.abs().ln();
        extraction.record(&state.cfg, ip)?;
        stats.kind_mut(kind).evaluated += 1;

        let x = self.projector.log_ratio(&counts, &state.counts);
        let w = metropolis_weight(x, log_ip - state.log_ip);
        if w > rng.gen::<f64>() {
            self.oracle.commit(&candidate, &state.cfg, amplitudes);
            state.counts = counts;
            state.log_ip = log_ip;
            stats.kind_mut(kind).accepted += 1;
            Ok(true)
        } else {
            state.cfg.revert(&candidate);
            Ok(false)
        }
    }

    /// Exhaustive walk from the ordered half-filled start. Returns the number
    /// of configurations recorded.
    fn enumerate(&mut self, extraction: &mut ExtractionContext) -> Result<usize> {
        let cfg = ElectronConfiguration::half_filled_ordered(&self.model)?;
        let mut state = self.recompute(cfg, extraction)?;
        info!("walking all spin configurations of {} sites", self.model.n_site());

        let oracle = &mut self.oracle;
        let comm = &self.comm;
        let swaps = walk_configurations(&mut state.cfg, |mv: &MoveCandidate, cfg| {
            let amplitudes = oracle.ratio_for_move(mv, cfg);
            let ip = oracle.inner_product(&amplitudes, comm)?;
            extraction.record(cfg, ip)?;
            oracle.commit(mv, cfg, amplitudes);
            Ok(())
        })?;
        info!("walk complete after {} exchanges", swaps);
        Ok(swaps + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metropolis_weight() {
        assert_eq!(metropolis_weight(0.0, 0.0), 1.0);
        assert!((metropolis_weight(0.5, -0.25) - (0.5f64).exp()).abs() < 1e-12);
        assert_eq!(metropolis_weight(0.0, f64::INFINITY), -1.0);
        assert_eq!(metropolis_weight(f64::NAN, 0.0), -1.0);
        assert_eq!(metropolis_weight(0.0, f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_move_stats_acceptance() {
        let stats = MoveStats { proposed: 10, evaluated: 4, accepted: 1 };
        assert_eq!(stats.acceptance(), 0.25);
        assert_eq!(MoveStats::default().acceptance(), 0.0);
    }

    #[test]
    fn test_params_builders() {
        let params = SamplingParams::default()
            .with_warm_up(3)
            .with_samples(7)
            .with_interval(2)
            .with_update_path(UpdatePath::Mixed)
            .with_recalibration_interval(9);
        assert_eq!(params.n_warm_up, 3);
        assert_eq!(params.n_sample, 7);
        assert_eq!(params.n_interval, 2);
        assert_eq!(params.update_path, UpdatePath::Mixed);
        assert_eq!(params.recalibration_interval, Some(9));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(ChainPhase::WarmingUp.to_string(), "warming up");
    }
}
