use std::process;
use std::thread;

use clap::Parser;
use log::{error, info};
#[cfg(feature = "mpi")]
use log::warn;
use rand::rngs::StdRng;
use rand::SeedableRng;

use lattice_vmc::sampling::MoveStats;
use lattice_vmc::{
    tight_binding_orbitals, ChainOutcome, ChainStats, Communicator, ExtractionContext, GutzwillerJastrow,
    LatticeModel, LatticeSlater, MemoryBurnIn, OrbitalSet, Result, RunConfig, VecSampleBuffer, VmcError,
    VmcSampler,
};
#[cfg(not(feature = "mpi"))]
use lattice_vmc::{SelfComm, ThreadGroup};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.yml")]
    config: String,
    /// Overrides the number of worker threads in the config file
    #[arg(short, long)]
    workers: Option<usize>,
    /// Overrides the sampling seed in the config file
    #[arg(short, long)]
    seed: Option<u64>,
}

struct ChainSummary {
    stats: ChainStats,
    final_log_ip: f64,
    mean_log_ip: f64,
}

enum RunSummary {
    Sampled { chains: Vec<ChainSummary>, workers: usize },
    Enumerated { records: usize },
}

/// Aborts the worker group if the owning thread unwinds.
struct AbortOnPanic<C: Communicator>(C);

impl<C: Communicator> Drop for AbortOnPanic<C> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match RunConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("cannot read '{}': {}", args.config, e);
            process::exit(1);
        }
    };
    config.apply_env();
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(seed) = args.seed {
        config.sampling.seed = seed;
    }

    match run(&config) {
        Ok(Some(RunSummary::Enumerated { records })) => {
            info!("walking complete; stopping the program now");
            println!("Exhaustive walk wrote {} wavefunction records", records);
            process::exit(0);
        }
        Ok(Some(RunSummary::Sampled { chains, workers })) => print_summary(&config, &chains, workers),
        // only the root worker reports
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

/// Run the configured chains. Returns the summary on the root worker only.
fn run(config: &RunConfig) -> Result<Option<RunSummary>> {
    let model = config.lattice.build()?;
    let wf = &config.wavefunction;
    let orbitals = tight_binding_orbitals(&model, wf.hopping, wf.n_qp, wf.perturbation, wf.seed)?;
    let projector = GutzwillerJastrow::uniform(&model, config.projector.gutzwiller, config.projector.jastrow_nn)?;
    info!(
        "{} sites, {} electrons per spin, {} local spins, {} components",
        model.n_site(),
        model.n_elec(),
        model.n_local_spin(),
        orbitals.len()
    );
    run_group(config, &model, orbitals, projector)
}

#[cfg(feature = "mpi")]
fn run_group(
    config: &RunConfig,
    model: &LatticeModel,
    orbitals: Vec<OrbitalSet>,
    projector: GutzwillerJastrow,
) -> Result<Option<RunSummary>> {
    let universe =
        mpi::initialize().ok_or_else(|| VmcError::Precondition("MPI was initialised more than once".into()))?;
    let world = universe.world();
    let root = world.is_root();
    if root {
        if config.workers > 1 {
            warn!("ignoring workers = {}; the MPI world sets the group size", config.workers);
        }
        info!("running on {} MPI process(es)", world.size());
    }
    let summary = run_worker(config, model, orbitals, projector, &world)?;
    Ok(root.then_some(summary))
}

#[cfg(not(feature = "mpi"))]
fn run_group(
    config: &RunConfig,
    model: &LatticeModel,
    orbitals: Vec<OrbitalSet>,
    projector: GutzwillerJastrow,
) -> Result<Option<RunSummary>> {
    let workers = config.workers.max(1);
    info!("running on {} worker thread(s)", workers);
    if workers == 1 {
        return run_worker(config, model, orbitals, projector, SelfComm).map(Some);
    }

    let comms = ThreadGroup::new(workers);
    let results: Vec<Result<RunSummary>> = thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let orbitals = orbitals.clone();
                let projector = projector.clone();
                scope.spawn(move || run_worker(config, model, orbitals, projector, comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(Err(VmcError::GroupAborted)))
            .collect()
    });

    // report the error that brought the group down rather than a peer's abort notice
    let mut summary = None;
    let mut aborted = false;
    for result in results {
        match result {
            Ok(s) => summary = summary.or(Some(s)),
            Err(VmcError::GroupAborted) => aborted = true,
            Err(e) => return Err(e),
        }
    }
    match summary {
        Some(s) if !aborted => Ok(Some(s)),
        _ => Err(VmcError::GroupAborted),
    }
}

/// Run every chain of one worker. Any error aborts the whole group; under
/// MPI that ends every process, so the error is logged first.
fn run_worker<C: Communicator>(
    config: &RunConfig,
    model: &LatticeModel,
    orbitals: Vec<OrbitalSet>,
    projector: GutzwillerJastrow,
    comm: C,
) -> Result<RunSummary> {
    let guard = AbortOnPanic(&comm);
    let result = sample_chains(config, model, orbitals, projector, &comm);
    if let Err(e) = &result {
        if !matches!(e, VmcError::GroupAborted) {
            error!("worker {}: {}", comm.rank(), e);
        }
        guard.0.abort();
    }
    result
}

fn sample_chains<C: Communicator>(
    config: &RunConfig,
    model: &LatticeModel,
    orbitals: Vec<OrbitalSet>,
    projector: GutzwillerJastrow,
    comm: C,
) -> Result<RunSummary> {
    let oracle = LatticeSlater::partitioned(orbitals, &comm)?;
    let mut extraction = ExtractionContext::open(
        config.extraction.path.as_deref(),
        config.extraction.enumerate,
        &comm,
    )?;
    let params = config.sampling.params();
    let mut sampler = VmcSampler::new(model.clone(), params, oracle, projector, comm);
    let mut rng = StdRng::seed_from_u64(config.sampling.seed);
    let mut burn_in = MemoryBurnIn::new();

    let mut chains = Vec::new();
    for chain in 0..config.sampling.n_chains.max(1) {
        let mut buffer = VecSampleBuffer::new(params.n_sample);
        match sampler.make_sample(&mut rng, &mut buffer, &mut burn_in, &mut extraction)? {
            ChainOutcome::Enumerated { records } => {
                extraction.close()?;
                return Ok(RunSummary::Enumerated { records });
            }
            ChainOutcome::Sampled { stats, final_log_ip } => {
                let n = buffer.filled().max(1) as f64;
                let mean_log_ip = buffer.records().map(|r| r.log_ip).sum::<f64>() / n;
                if sampler.comm().is_root() {
                    info!("chain {} done: final log|ψ| = {:.6}", chain, final_log_ip);
                }
                chains.push(ChainSummary {
                    stats,
                    final_log_ip,
                    mean_log_ip,
                });
            }
        }
    }
    extraction.close()?;
    Ok(RunSummary::Sampled {
        chains,
        workers: sampler.comm().size(),
    })
}

fn print_summary(config: &RunConfig, chains: &[ChainSummary], workers: usize) {
    let rate = |m: &MoveStats| 100.0 * m.acceptance();
    println!("VMC Sampling Results");
    println!("----------------------------------------");
    println!("Sites: {}", config.lattice.n_site);
    println!("Electrons per spin: {}", config.lattice.n_elec);
    println!("Update path: {:?}", config.sampling.update_path);
    println!("Workers: {}", workers);
    for (i, chain) in chains.iter().enumerate() {
        let s = &chain.stats;
        println!(
            "Chain {}: {} samples, hopping {:.1}% ({}/{}), exchange {:.1}% ({}/{}), {} recalibrations",
            i,
            s.samples_saved,
            rate(&s.hopping),
            s.hopping.accepted,
            s.hopping.evaluated,
            rate(&s.exchange),
            s.exchange.accepted,
            s.exchange.evaluated,
            s.recalibrations
        );
        println!(
            "         mean log|ψ| = {:.6}, final log|ψ| = {:.6}",
            chain.mean_log_ip, chain.final_log_ip
        );
    }
}
