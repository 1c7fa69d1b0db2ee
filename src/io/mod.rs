//! IO module - run configuration and wavefunction extraction.

mod config;
mod extraction;

pub use config::{
    parse_flag, ExtractionConfig, HoppingSpec, LatticeConfig, LocalSpinSpec, ProjectorConfig, RunConfig,
    SamplingConfig, WavefunctionConfig, EXTRACT_PATH_VAR, EXTRACT_WALK_VAR,
};
pub use extraction::{ExtractionContext, ExtractionRecord, ExtractionSink, FileSink, MemorySink};
