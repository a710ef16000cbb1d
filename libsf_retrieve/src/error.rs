use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;
use super::retrieval::JobState;

#[derive(Debug, Clone, Error)]
pub enum LocatorError {
    #[error("Module {module} is out of range for a detector with {n_modules} modules")]
    ModuleOutOfRange { module: usize, n_modules: usize },
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("ModuleFrameReader could not open shard file {path:?}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ModuleFrameReader read {found} bytes at offset {offset} of {path:?}; expected {expected} (truncated or corrupt shard)")]
    ShortRead {
        path: PathBuf,
        offset: u64,
        expected: usize,
        found: usize,
    },
    #[error("ModuleFrameReader failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ModuleFrameReader failed due to locator error: {0}")]
    LocatorError(#[from] LocatorError),
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("RingFrameBuffer requires at least {min} slots, got {0}", min=MIN_BUFFER_SLOTS)]
    TooFewSlots(usize),
    #[error("RingFrameBuffer requires at least one module")]
    NoModules,
    #[error("RingFrameBuffer of {n_modules} modules x {n_slots} slots does not fit in memory")]
    TooLarge { n_modules: usize, n_slots: usize },
    #[error("RingFrameBuffer pulse stride must be positive")]
    ZeroStride,
    #[error("RingFrameBuffer lane for module {0} is already claimed by another writer")]
    LaneClaimed(usize),
    #[error("RingFrameBuffer has no module {module}; it holds {n_modules} modules")]
    ModuleOutOfRange { module: usize, n_modules: usize },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Ingest worker for module {module} failed: {source}")]
    Reader {
        module: usize,
        #[source]
        source: ReaderError,
    },
    #[error("Ingest worker for module {module} could not hand off pulse {pulse_id} within the timeout")]
    BackpressureTimeout { module: usize, pulse_id: u64 },
    #[error("Ingest worker for module {0} panicked")]
    WorkerPanicked(usize),
    #[error("Ingest failed to spawn a worker thread: {0}")]
    SpawnError(#[source] std::io::Error),
    #[error("Ingest failed due to buffer error: {0}")]
    BufferError(#[from] BufferError),
}

#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error("No data from ingest workers: module {module} produced nothing for pulse {pulse_id} within the timeout")]
    IngestTimeout { module: usize, pulse_id: u64 },
    #[error("Ingest worker for module {module} stopped before delivering pulse {pulse_id}")]
    IngestStopped { module: usize, pulse_id: u64 },
    #[error("Module {module} delivered pulse {found} while pulse {expected} was being assembled; module streams have diverged")]
    Synchronization {
        module: usize,
        expected: u64,
        found: u64,
    },
    #[error("FrameAssembler was already closed")]
    Closed,
}

#[derive(Debug, Clone, Error)]
pub enum AlignmentError {
    #[error("Rate multiplicator {0} does not evenly divide the facility rate of {rate} Hz", rate=FACILITY_PULSE_RATE)]
    InvalidRateMultiplicator(u64),
    #[error("Pulse range is inverted -- start: {start} stop: {stop}")]
    InvertedRange { start: u64, stop: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Config has an invalid pulse alignment: {0}")]
    AlignmentError(#[from] AlignmentError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Frame sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Frame sink failed to write YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Frame sink rejected pulse {pulse_id}: {reason}")]
    Rejected { pulse_id: u64, reason: String },
    #[error("Frame sink was already finished")]
    Finished,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Retrieval failed due to alignment error: {0}")]
    AlignmentError(#[from] AlignmentError),
    #[error("Retrieval failed due to buffer error: {0}")]
    BufferError(#[from] BufferError),
    #[error("Retrieval failed due to Ingest error: {0}")]
    IngestError(#[from] IngestError),
    #[error("Retrieval failed due to FrameAssembler error: {0}")]
    AssemblerError(#[from] AssemblerError),
    #[error("Retrieval failed due to frame sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Retrieval job cannot be started from state {0:?}")]
    InvalidState(JobState),
}
