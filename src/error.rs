//! Error types for the lattice VMC sampler.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmcError {
    /// A model or runtime configuration violates a precondition of the sampler.
    #[error("configuration precondition violated: {0}")]
    Precondition(String),

    /// The full recomputation produced a non-finite log amplitude.
    /// The driver resamples the initial configuration once on this error.
    #[error("non-finite log amplitude after full recomputation: {log_ip:e}")]
    NonFiniteAmplitude { log_ip: f64 },

    #[error("configuration is degenerate: log amplitude {log_ip:e} is non-finite after resampling")]
    Degenerate { log_ip: f64 },

    #[error("initial sample: too many attempts ({attempts}) without a non-singular configuration")]
    InitialSampleExhausted { attempts: usize },

    #[error("too many electrons: {length}; at most 64 electrons are supported")]
    PermutationTooLong { length: usize },

    #[error("invalid permutation: {permutation:?}")]
    InvalidPermutation { permutation: Vec<usize> },

    #[error("lattice too big: {n_site}; at most 64 sites are supported")]
    LatticeTooLarge { n_site: usize },

    #[error("worker group aborted by a peer")]
    GroupAborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl VmcError {
    /// Whether the driver may recover from this error by resampling.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VmcError::NonFiniteAmplitude { .. })
    }
}

pub type Result<T> = std::result::Result<T, VmcError>;
