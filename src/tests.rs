use std::collections::HashSet;
use std::thread;

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::VmcError;
use crate::io::{ExtractionContext, ExtractionRecord, MemorySink};
use crate::lattice::{permutation_sign, ElectronConfiguration, LatticeModel, Spin};
use crate::parallel::{Communicator, SelfComm, ThreadGroup};
use crate::sampling::{
    BurnInStore, ChainOutcome, ChainStats, MemoryBurnIn, MoveCandidate, SamplingParams, UpdatePath,
    VecSampleBuffer, VmcSampler,
};
use crate::wavefunction::{
    tight_binding_orbitals, AmplitudeOracle, GutzwillerJastrow, LatticeSlater, NoProjector, OrbitalSet, Projector,
};
use nalgebra::DMatrix;

fn spin_model(n_site: usize) -> LatticeModel {
    LatticeModel::new(n_site, n_site / 2)
        .unwrap()
        .with_all_local_spin()
        .unwrap()
        .with_ring_hopping()
        .unwrap()
}

/// Run one chain and return its statistics and final log amplitude.
fn run_chain<O, P, C>(
    sampler: &mut VmcSampler<O, P, C>,
    rng: &mut StdRng,
    buffer: &mut VecSampleBuffer,
    burn_in: &mut MemoryBurnIn,
    extraction: &mut ExtractionContext,
) -> (ChainStats, f64)
where
    O: AmplitudeOracle,
    P: Projector,
    C: Communicator,
{
    match sampler.make_sample(rng, buffer, burn_in, extraction).unwrap() {
        ChainOutcome::Sampled { stats, final_log_ip } => (stats, final_log_ip),
        other => panic!("expected a sampled chain, got {:?}", other),
    }
}

/// Signed amplitude of the occupation pattern `bits`, computed with electrons
/// labelled in ascending site order.
fn reference_amplitude(model: &LatticeModel, components: &[OrbitalSet], bits: u64) -> f64 {
    let up: Vec<usize> = (0..model.n_site()).filter(|&p| bits >> p & 1 == 0).collect();
    let down: Vec<usize> = (0..model.n_site()).filter(|&p| bits >> p & 1 == 1).collect();
    let cfg = ElectronConfiguration::from_sites(model, &up, &down).unwrap();
    let ip: f64 = components.iter().map(|c| c.weight * c.amplitude(&cfg)).sum();
    ip * f64::from(permutation_sign(cfg.ele_idx()).unwrap())
}

#[test]
fn test_enumeration_four_sites_two_electrons() {
    let model = spin_model(4);
    let components = tight_binding_orbitals(&model, 1.0, 2, 0.3, 17).unwrap();
    let oracle = LatticeSlater::new(components.clone()).unwrap();
    let mut sampler = VmcSampler::new(model.clone(), SamplingParams::default(), oracle, NoProjector, SelfComm);

    let sink = MemorySink::new();
    let mut extraction = ExtractionContext::with_sink(Box::new(sink.clone()), true, &SelfComm).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let outcome = sampler
        .make_sample(&mut rng, &mut VecSampleBuffer::new(0), &mut MemoryBurnIn::new(), &mut extraction)
        .unwrap();
    assert_eq!(outcome, ChainOutcome::Enumerated { records: 6 });

    let records = sink.records();
    assert_eq!(records.len(), 6);
    let patterns: HashSet<u64> = records.iter().map(|r| r.bits).collect();
    let expected: HashSet<u64> = [0b0011, 0b0101, 0b0110, 0b1001, 0b1010, 0b1100].into_iter().collect();
    assert_eq!(patterns, expected);

    for record in &records {
        let reference = reference_amplitude(&model, &components, record.bits);
        assert_relative_eq!(record.amplitude, reference, epsilon = 1e-10, max_relative = 1e-8);
    }
}

#[test]
fn test_enumeration_visits_every_pattern_of_larger_lattices() {
    for (n_site, count) in [(6, 20), (8, 70)] {
        let model = spin_model(n_site);
        let components = tight_binding_orbitals(&model, 1.0, 1, 0.3, 5).unwrap();
        let oracle = LatticeSlater::new(components.clone()).unwrap();
        let mut sampler = VmcSampler::new(model.clone(), SamplingParams::default(), oracle, NoProjector, SelfComm);
        let sink = MemorySink::new();
        let mut extraction = ExtractionContext::with_sink(Box::new(sink.clone()), true, &SelfComm).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let outcome = sampler
            .make_sample(&mut rng, &mut VecSampleBuffer::new(0), &mut MemoryBurnIn::new(), &mut extraction)
            .unwrap();
        assert_eq!(outcome, ChainOutcome::Enumerated { records: count });

        let records = sink.records();
        let patterns: HashSet<u64> = records.iter().map(|r| r.bits).collect();
        assert_eq!(patterns.len(), count);
        for record in &records {
            let reference = reference_amplitude(&model, &components, record.bits);
            assert_relative_eq!(record.amplitude, reference, epsilon = 1e-8, max_relative = 1e-6);
        }
    }
}

#[test]
fn test_enumeration_requires_half_filled_local_spins() {
    let model = LatticeModel::new(4, 2).unwrap();
    let components = tight_binding_orbitals(&model, 1.0, 1, 0.3, 5).unwrap();
    let oracle = LatticeSlater::new(components).unwrap();
    let mut sampler = VmcSampler::new(model, SamplingParams::default(), oracle, NoProjector, SelfComm);
    let sink = MemorySink::new();
    let mut extraction = ExtractionContext::with_sink(Box::new(sink.clone()), true, &SelfComm).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let result = sampler.make_sample(&mut rng, &mut VecSampleBuffer::new(0), &mut MemoryBurnIn::new(), &mut extraction);
    assert!(matches!(result, Err(VmcError::Precondition(_))));
    assert!(sink.records().is_empty());
}

#[test]
fn test_signed_amplitude_does_not_depend_on_labels() {
    let model = spin_model(4);
    let components = tight_binding_orbitals(&model, 1.0, 3, 0.3, 9).unwrap();
    let mut oracle = LatticeSlater::new(components).unwrap();

    let mut signed = |up: &[usize], down: &[usize]| {
        let cfg = ElectronConfiguration::from_sites(&model, up, down).unwrap();
        oracle.compute_full(&cfg);
        let ip = oracle.inner_product(oracle.amplitudes(), &SelfComm).unwrap();
        ExtractionRecord::new(&cfg, ip).unwrap()
    };
    let a = signed(&[0, 2], &[1, 3]);
    let b = signed(&[2, 0], &[1, 3]);
    let c = signed(&[2, 0], &[3, 1]);
    assert_eq!(a.bits, b.bits);
    assert_eq!(a.bits, c.bits);
    assert_relative_eq!(a.amplitude, b.amplitude, epsilon = 1e-12);
    assert_relative_eq!(a.amplitude, c.amplitude, epsilon = 1e-12);
}

#[test]
fn test_acceptance_rate_of_a_product_state() {
    // ψ = f(up site) with f = (1, 0.5); the down electron does not change ψ.
    // Up hops are accepted with probability 0.8 * 0.25 + 0.2 * 1 = 0.4 in
    // equilibrium and down hops always, so the overall rate is 0.7.
    let model = LatticeModel::new(2, 1).unwrap();
    let component = OrbitalSet {
        weight: 1.0,
        up: DMatrix::from_row_slice(2, 1, &[1.0, 0.5]),
        down: DMatrix::from_row_slice(2, 1, &[1.0, 1.0]),
    };
    let oracle = LatticeSlater::new(vec![component]).unwrap();
    let params = SamplingParams::default()
        .with_warm_up(10)
        .with_samples(4000)
        .with_interval(5);
    let mut sampler = VmcSampler::new(model, params, oracle, NoProjector, SelfComm);
    let mut rng = StdRng::seed_from_u64(42);
    let mut buffer = VecSampleBuffer::new(params.n_sample);
    let (stats, _) = run_chain(
        &mut sampler,
        &mut rng,
        &mut buffer,
        &mut MemoryBurnIn::new(),
        &mut ExtractionContext::disabled(),
    );

    assert_eq!(stats.hopping.proposed, stats.hopping.evaluated);
    assert_eq!(stats.hopping.evaluated, (10 + 4000) * 5 * 2);
    assert!((stats.hopping.acceptance() - 0.7).abs() < 0.02, "{}", stats.hopping.acceptance());

    let at_origin = buffer.records().filter(|r| r.config.site_of(0, Spin::Up) == 0).count();
    let fraction = at_origin as f64 / buffer.filled() as f64;
    assert!((fraction - 0.8).abs() < 0.04, "{}", fraction);
}

#[test]
fn test_incremental_log_amplitude_stays_close_to_recomputed() {
    let model = LatticeModel::new(6, 3).unwrap().with_ring_hopping().unwrap();
    let components = tight_binding_orbitals(&model, 1.0, 3, 0.3, 21).unwrap();
    let projector = GutzwillerJastrow::uniform(&model, -0.6, 0.2).unwrap();
    let params = SamplingParams::default()
        .with_warm_up(50)
        .with_samples(200)
        .with_update_path(UpdatePath::Mixed)
        .with_recalibration_interval(usize::MAX);
    let oracle = LatticeSlater::new(components.clone()).unwrap();
    let mut sampler = VmcSampler::new(model.clone(), params, oracle, projector.clone(), SelfComm);
    let mut rng = StdRng::seed_from_u64(8);
    let mut burn_in = MemoryBurnIn::new();
    let (stats, final_log_ip) = run_chain(
        &mut sampler,
        &mut rng,
        &mut VecSampleBuffer::new(params.n_sample),
        &mut burn_in,
        &mut ExtractionContext::disabled(),
    );
    assert_eq!(stats.recalibrations, 0);
    assert!(stats.accepted() > 100);

    let last = burn_in.load().unwrap();
    last.check_invariants(&model).unwrap();
    let mut fresh = LatticeSlater::new(components.clone()).unwrap();
    fresh.compute_full(&last);
    let exact = fresh.inner_product(fresh.amplitudes(), &SelfComm).unwrap().abs().ln();
    assert_relative_eq!(final_log_ip, exact, epsilon = 1e-8);

    // with the default threshold the chain recalibrates every n_site acceptances
    let params = params.with_samples(20);
    let params = SamplingParams {
        recalibration_interval: None,
        ..params
    };
    let oracle = LatticeSlater::new(components).unwrap();
    let mut sampler = VmcSampler::new(model.clone(), params, oracle, projector, SelfComm);
    let (stats, _) = run_chain(
        &mut sampler,
        &mut rng,
        &mut VecSampleBuffer::new(params.n_sample),
        &mut MemoryBurnIn::new(),
        &mut ExtractionContext::disabled(),
    );
    assert!(stats.recalibrations > 0);
    assert!(stats.recalibrations <= stats.accepted() / (model.n_site() + 1));
}

#[test]
fn test_second_chain_restores_the_burn_in_snapshot() {
    let model = LatticeModel::new(4, 2).unwrap().with_ring_hopping().unwrap();
    let components = tight_binding_orbitals(&model, 1.0, 2, 0.3, 4).unwrap();
    let params = SamplingParams::default().with_warm_up(5).with_samples(4);
    let oracle = LatticeSlater::new(components).unwrap();
    let mut sampler = VmcSampler::new(model, params, oracle, NoProjector, SelfComm);
    let mut rng = StdRng::seed_from_u64(6);
    let mut burn_in = MemoryBurnIn::new();

    let mut first = VecSampleBuffer::new(4);
    let (stats, _) = run_chain(&mut sampler, &mut rng, &mut first, &mut burn_in, &mut ExtractionContext::disabled());
    assert!(!stats.restored);
    assert_eq!(stats.outer_steps, 9);
    assert_eq!(first.filled(), 4);
    let snapshot = burn_in.load().unwrap();
    assert_eq!(&first.get(3).unwrap().config, &snapshot);

    let mut second = VecSampleBuffer::new(4);
    let (stats, _) = run_chain(&mut sampler, &mut rng, &mut second, &mut burn_in, &mut ExtractionContext::disabled());
    assert!(stats.restored);
    assert_eq!(stats.outer_steps, 5);
    assert_eq!(stats.samples_saved, 4);
    assert_eq!(second.filled(), 4);
}

/// Oracle with a single component whose full recomputation returns zero for
/// the first `zero_calls` calls and one afterwards; moves never change it.
struct ScriptedOracle {
    zero_calls: usize,
    status: i32,
    calls: usize,
    amps: Vec<f64>,
}

impl ScriptedOracle {
    fn new(zero_calls: usize, status: i32) -> Self {
        Self {
            zero_calls,
            status,
            calls: 0,
            amps: vec![0.0],
        }
    }
}

impl AmplitudeOracle for ScriptedOracle {
    fn compute_full(&mut self, _cfg: &ElectronConfiguration) -> i32 {
        self.calls += 1;
        self.amps[0] = if self.calls <= self.zero_calls { 0.0 } else { 1.0 };
        self.status
    }

    fn amplitudes(&self) -> &[f64] {
        &self.amps
    }

    fn ratio_for_move(&self, _candidate: &MoveCandidate, _cfg: &ElectronConfiguration) -> Vec<f64> {
        self.amps.clone()
    }

    fn commit(&mut self, _candidate: &MoveCandidate, _cfg: &ElectronConfiguration, amplitudes: Vec<f64>) {
        self.amps = amplitudes;
    }

    fn local_inner_product(&self, amplitudes: &[f64]) -> f64 {
        amplitudes.iter().sum()
    }
}

fn scripted_chain(oracle: ScriptedOracle) -> (Result<ChainOutcome, VmcError>, usize) {
    let model = LatticeModel::new(3, 1).unwrap();
    let params = SamplingParams::default()
        .with_warm_up(2)
        .with_samples(2)
        .with_recalibration_interval(usize::MAX);
    let mut sampler = VmcSampler::new(model, params, oracle, NoProjector, SelfComm);
    let mut rng = StdRng::seed_from_u64(10);
    let result = sampler.make_sample(
        &mut rng,
        &mut VecSampleBuffer::new(2),
        &mut MemoryBurnIn::new(),
        &mut ExtractionContext::disabled(),
    );
    (result, sampler.oracle().calls)
}

#[test]
fn test_zero_initial_amplitude_is_resampled_once() {
    let (result, calls) = scripted_chain(ScriptedOracle::new(1, 0));
    match result.unwrap() {
        ChainOutcome::Sampled { final_log_ip, stats } => {
            assert_eq!(final_log_ip, 0.0);
            assert_eq!(stats.samples_saved, 2);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(calls, 2);

    let (result, calls) = scripted_chain(ScriptedOracle::new(2, 0));
    assert!(matches!(result, Err(VmcError::Degenerate { .. })));
    assert_eq!(calls, 2);
}

#[test]
fn test_singular_oracle_exhausts_initial_attempts() {
    let (result, calls) = scripted_chain(ScriptedOracle::new(0, 1));
    assert!(matches!(
        result,
        Err(VmcError::InitialSampleExhausted { attempts: 100 })
    ));
    assert_eq!(calls, 100);
}

#[test]
fn test_zero_amplitude_snapshot_falls_back_to_a_fresh_chain() {
    // the up orbital vanishes on site 2, so a snapshot with the up electron
    // there has zero amplitude
    let model = LatticeModel::new(3, 1).unwrap();
    let component = OrbitalSet {
        weight: 1.0,
        up: DMatrix::from_row_slice(3, 1, &[1.0, 0.5, 0.0]),
        down: DMatrix::from_row_slice(3, 1, &[1.0, 1.0, 1.0]),
    };
    let params = SamplingParams::default().with_warm_up(7).with_samples(3);
    let oracle = LatticeSlater::new(vec![component]).unwrap();
    let mut sampler = VmcSampler::new(model.clone(), params, oracle, NoProjector, SelfComm);
    let mut burn_in = MemoryBurnIn::new();
    burn_in.save(&ElectronConfiguration::from_sites(&model, &[2], &[0]).unwrap());

    let mut buffer = VecSampleBuffer::new(3);
    let (stats, final_log_ip) = run_chain(
        &mut sampler,
        &mut StdRng::seed_from_u64(14),
        &mut buffer,
        &mut burn_in,
        &mut ExtractionContext::disabled(),
    );
    assert!(!stats.restored);
    assert_eq!(stats.outer_steps, 7 + 3);
    assert_eq!(buffer.filled(), 3);
    assert!(final_log_ip.is_finite());
    assert_ne!(burn_in.load().unwrap().site_of(0, Spin::Up), 2);
}

#[test]
fn test_zero_amplitude_snapshot_twice_is_degenerate() {
    let model = LatticeModel::new(3, 1).unwrap();
    let params = SamplingParams::default().with_warm_up(2).with_samples(2);
    let mut sampler = VmcSampler::new(model.clone(), params, ScriptedOracle::new(2, 0), NoProjector, SelfComm);
    let mut burn_in = MemoryBurnIn::new();
    burn_in.save(&ElectronConfiguration::from_sites(&model, &[0], &[1]).unwrap());

    let result = sampler.make_sample(
        &mut StdRng::seed_from_u64(15),
        &mut VecSampleBuffer::new(2),
        &mut burn_in,
        &mut ExtractionContext::disabled(),
    );
    assert!(matches!(result, Err(VmcError::Degenerate { .. })));
    assert_eq!(sampler.oracle().calls, 2);
}

#[test]
fn test_every_evaluation_is_extracted() {
    let model = spin_model(6);
    let components = tight_binding_orbitals(&model, 1.0, 2, 0.3, 12).unwrap();
    let params = SamplingParams::default()
        .with_warm_up(5)
        .with_samples(10)
        .with_update_path(UpdatePath::Exchange);
    let oracle = LatticeSlater::new(components.clone()).unwrap();
    let mut sampler = VmcSampler::new(model.clone(), params, oracle, NoProjector, SelfComm);
    let sink = MemorySink::new();
    let mut extraction = ExtractionContext::with_sink(Box::new(sink.clone()), false, &SelfComm).unwrap();
    let mut rng = StdRng::seed_from_u64(13);
    let (stats, _) = run_chain(
        &mut sampler,
        &mut rng,
        &mut VecSampleBuffer::new(10),
        &mut MemoryBurnIn::new(),
        &mut extraction,
    );

    assert_eq!(stats.hopping.proposed, 0);
    let records = sink.records();
    assert_eq!(records.len(), 1 + stats.exchange.evaluated + stats.recalibrations);
    assert_eq!(extraction.written(), records.len());
    for record in &records {
        assert_eq!(record.bits.count_ones(), 3);
        let reference = reference_amplitude(&model, &components, record.bits);
        assert_relative_eq!(record.amplitude, reference, epsilon = 1e-8, max_relative = 1e-6);
    }
}

#[test]
fn test_two_workers_match_one_worker() {
    let model = LatticeModel::new(6, 2).unwrap().with_ring_hopping().unwrap();
    let components = tight_binding_orbitals(&model, 1.0, 5, 0.3, 31).unwrap();
    let projector = GutzwillerJastrow::uniform(&model, -0.4, 0.1).unwrap();
    let params = SamplingParams::default()
        .with_warm_up(20)
        .with_samples(30)
        .with_update_path(UpdatePath::Mixed);
    let seed = 77;

    let oracle = LatticeSlater::new(components.clone()).unwrap();
    let mut sampler = VmcSampler::new(model.clone(), params, oracle, projector.clone(), SelfComm);
    let (single, single_log_ip) = run_chain(
        &mut sampler,
        &mut StdRng::seed_from_u64(seed),
        &mut VecSampleBuffer::new(params.n_sample),
        &mut MemoryBurnIn::new(),
        &mut ExtractionContext::disabled(),
    );

    let comms = ThreadGroup::new(2);
    let group: Vec<(ChainStats, f64)> = thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let (model, components, projector) = (model.clone(), components.clone(), projector.clone());
                scope.spawn(move || {
                    let oracle = LatticeSlater::partitioned(components, &comm).unwrap();
                    let mut sampler = VmcSampler::new(model, params, oracle, projector, comm);
                    run_chain(
                        &mut sampler,
                        &mut StdRng::seed_from_u64(seed),
                        &mut VecSampleBuffer::new(params.n_sample),
                        &mut MemoryBurnIn::new(),
                        &mut ExtractionContext::disabled(),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(group[0], group[1]);
    assert_eq!(group[0].0, single);
    assert_relative_eq!(group[0].1, single_log_ip, epsilon = 1e-10);
}

#[test]
fn test_extraction_rejects_worker_groups() {
    let comms = ThreadGroup::new(3);
    let result = ExtractionContext::with_sink(Box::new(MemorySink::new()), false, &comms[1]);
    assert!(matches!(result, Err(VmcError::Precondition(_))));
}
