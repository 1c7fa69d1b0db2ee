//! Wavefunction extraction: every evaluated amplitude, keyed by its spin pattern.
//!
//! Records are appended as two tab-separated columns, the bit-packed spin
//! configuration (bit `p` set iff site `p` has no up electron) and the inner
//! product multiplied by the parity of the electron-index ordering.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::info;

use crate::error::{Result, VmcError};
use crate::lattice::{permutation_sign, ElectronConfiguration};
use crate::parallel::Communicator;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractionRecord {
    pub bits: u64,
    pub amplitude: f64,
}

impl ExtractionRecord {
    /// Record for `cfg` with signed inner product `ip`.
    pub fn new(cfg: &ElectronConfiguration, ip: f64) -> Result<Self> {
        let bits = cfg.spin_bits()?;
        let sign = permutation_sign(cfg.ele_idx())?;
        Ok(Self {
            bits,
            amplitude: ip * f64::from(sign),
        })
    }
}

/// Append-only destination for extraction records.
pub trait ExtractionSink: Send {
    fn write(&mut self, record: &ExtractionRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Text file opened in append mode.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl ExtractionSink for FileSink {
    fn write(&mut self, record: &ExtractionRecord) -> Result<()> {
        writeln!(self.writer, "{}\t{:.6}", record.bits, record.amplitude)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps records in memory; clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ExtractionRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written so far. A writer that panicked mid-push leaves the
    /// records before it intact, so a poisoned lock is read through.
    pub fn records(&self) -> Vec<ExtractionRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ExtractionSink for MemorySink {
    fn write(&mut self, record: &ExtractionRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*record);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn require_single_worker<C: Communicator + ?Sized>(comm: &C) -> Result<()> {
    if comm.size() > 1 {
        return Err(VmcError::Precondition(format!(
            "wavefunction extraction with {} workers is not supported",
            comm.size()
        )));
    }
    Ok(())
}

/// Extraction state owned by the coordinator and handed to the driver.
#[derive(Default)]
pub struct ExtractionContext {
    sink: Option<Box<dyn ExtractionSink>>,
    enumerate: bool,
    written: usize,
}

impl ExtractionContext {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Route records to `sink`. Extraction needs a single coherent output
    /// stream, so a group of more than one worker is rejected.
    pub fn with_sink<C: Communicator + ?Sized>(
        sink: Box<dyn ExtractionSink>,
        enumerate: bool,
        comm: &C,
    ) -> Result<Self> {
        require_single_worker(comm)?;
        Ok(Self {
            sink: Some(sink),
            enumerate,
            written: 0,
        })
    }

    /// Open `path` for appending, if given.
    pub fn open<C: Communicator + ?Sized>(path: Option<&Path>, enumerate: bool, comm: &C) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::disabled());
        };
        require_single_worker(comm)?;
        info!("opening '{}'; all wavefunction evaluations will be written to it", path.display());
        Self::with_sink(Box::new(FileSink::append(path)?), enumerate, comm)
    }

    pub fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    /// Enumeration only takes effect while a sink is configured.
    pub fn should_enumerate(&self) -> bool {
        self.enumerate && self.sink.is_some()
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn record(&mut self, cfg: &ElectronConfiguration, ip: f64) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        sink.write(&ExtractionRecord::new(cfg, ip)?)?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }

    pub fn close(mut self) -> Result<()> {
        if self.sink.is_some() {
            info!("closing the extraction file after {} records", self.written);
            self.flush()?;
        }
        Ok(())
    }
}
