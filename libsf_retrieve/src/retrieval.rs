use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::assembler::FrameAssembler;
use super::config::Config;
use super::error::{AssemblerError, IngestError, RetrievalError};
use super::frame_writer::FrameSink;
use super::ingest::ParallelIngestCoordinator;
use super::locator::ModuleFrameLocator;
use super::pulse_alignment::{detector_pulse_range, widen_request_range, PulseRange};
use super::ring_buffer::RingFrameBuffer;

/// Lifecycle of one retrieval job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Ingesting,
    Draining,
    Failed,
    Closed,
}

/// What a retrieval job did, suitable for writing next to the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSummary {
    pub requested_start_pulse_id: u64,
    pub requested_stop_pulse_id: u64,
    /// Request range after widening for the rate multiplicator
    pub dispatch_window: (u64, u64),
    /// Pulses the detector actually recorded inside the request, if any
    pub detector_range: Option<PulseRange>,
    pub n_modules: usize,
    pub n_frames: u64,
    pub n_incomplete_frames: u64,
    pub n_bytes: u64,
}

/// RetrievalOrchestrator runs one retrieval job from allocation to teardown.
///
/// Idle -> Ingesting -> Draining -> Closed, or Idle -> Ingesting -> Failed -> Closed when any
/// part of the pipeline fails. A job rejected before ingest goes Idle -> Failed -> Closed.
/// Teardown (stop and join the workers, release the channels, free the buffer) happens on
/// every path. Nothing is retried here.
#[derive(Debug)]
pub struct RetrievalOrchestrator {
    config: Config,
    state: JobState,
}

impl RetrievalOrchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: JobState::Idle,
        }
    }

    pub fn get_state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        spdlog::debug!("Retrieval job {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// End a job that never got its workers running
    fn fail(&mut self, error: RetrievalError) -> RetrievalError {
        spdlog::error!("Retrieval job failed before ingest: {error}");
        self.transition(JobState::Failed);
        self.transition(JobState::Closed);
        error
    }

    /// Run the job, forwarding every assembled frame to `sink`.
    ///
    /// A job can only be run once.
    pub fn run<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<RetrievalSummary, RetrievalError> {
        if self.state != JobState::Idle {
            return Err(RetrievalError::InvalidState(self.state));
        }
        let config = self.config.clone();
        let (dispatch_window, detector_range) = match align(&config) {
            Ok(aligned) => aligned,
            Err(error) => return Err(self.fail(error)),
        };
        let mut summary = RetrievalSummary {
            requested_start_pulse_id: config.start_pulse_id,
            requested_stop_pulse_id: config.stop_pulse_id,
            dispatch_window,
            detector_range,
            n_modules: config.n_modules,
            n_frames: 0,
            n_incomplete_frames: 0,
            n_bytes: 0,
        };
        spdlog::info!(
            "Retrieving pulses {} to {} from {} ({} modules, rate multiplicator {})",
            config.start_pulse_id,
            config.stop_pulse_id,
            config.detector_root.display(),
            config.n_modules,
            config.rate_multiplicator
        );
        spdlog::info!(
            "Dispatch window: {} to {}",
            dispatch_window.0,
            dispatch_window.1
        );

        let Some(range) = detector_range else {
            spdlog::warn!(
                "No detector pulses between {} and {} for rate multiplicator {}; nothing to retrieve",
                config.start_pulse_id,
                config.stop_pulse_id,
                config.rate_multiplicator
            );
            if let Err(error) = sink.finish() {
                return Err(self.fail(error.into()));
            }
            self.transition(JobState::Closed);
            return Ok(summary);
        };
        spdlog::info!(
            "Detector pulses: {} to {} ({} frames)",
            range.start,
            range.stop,
            range.len()
        );

        self.transition(JobState::Ingesting);
        let (mut coordinator, mut assembler) = match start_ingest(&config, range) {
            Ok(started) => started,
            Err(error) => return Err(self.fail(error)),
        };

        self.transition(JobState::Draining);
        let drained = drain(&mut assembler, range, sink, &mut summary);
        if drained.is_err() {
            self.transition(JobState::Failed);
        }

        // Workers hold the last references to the ring buffer besides the assembler
        let worker_results = coordinator.close();
        assembler.close();
        self.transition(JobState::Closed);

        let worker_error = worker_results.into_iter().find_map(Result::err);
        match (drained, worker_error) {
            (Ok(()), None) => {
                if summary.n_incomplete_frames > 0 {
                    spdlog::warn!(
                        "{} of {} frames had missing packets or mismatched pulse ids",
                        summary.n_incomplete_frames,
                        summary.n_frames
                    );
                }
                spdlog::info!("Retrieved {} frames.", summary.n_frames);
                Ok(summary)
            }
            (Ok(()), Some(worker_error)) => Err(RetrievalError::IngestError(worker_error)),
            (Err(error), worker_error) => Err(root_cause(error, worker_error)),
        }
    }
}

/// Check the job and derive the widened dispatch window and the detector pulse range
fn align(config: &Config) -> Result<((u64, u64), Option<PulseRange>), RetrievalError> {
    config.validate()?;
    let dispatch_window = widen_request_range(
        config.start_pulse_id,
        config.stop_pulse_id,
        config.rate_multiplicator,
    )?;
    let detector_range = detector_pulse_range(
        config.start_pulse_id,
        config.stop_pulse_id,
        config.rate_multiplicator,
    )?;
    Ok((dispatch_window, detector_range))
}

/// Allocate the ring buffer and launch the ingest workers
fn start_ingest(
    config: &Config,
    range: PulseRange,
) -> Result<(ParallelIngestCoordinator, FrameAssembler), RetrievalError> {
    let buffer = Arc::new(RingFrameBuffer::with_pulse_stride(
        config.n_modules,
        config.effective_n_slots(),
        range.step,
    )?);
    spdlog::info!(
        "Ring buffer: {} slots, pulse stride {}, {}",
        buffer.get_layout().get_n_slots(),
        buffer.get_layout().get_pulse_stride(),
        human_bytes::human_bytes(buffer.size_bytes() as f64)
    );
    let locator = ModuleFrameLocator::new(&config.detector_root, config.n_modules);
    let (coordinator, streams) =
        ParallelIngestCoordinator::start(&buffer, &locator, range, config.ingest_timeout())?;
    Ok((
        coordinator,
        FrameAssembler::new(streams, config.assembly_timeout()),
    ))
}

/// Assemble every pulse of the range and hand it to the sink
fn drain<S: FrameSink + ?Sized>(
    assembler: &mut FrameAssembler,
    range: PulseRange,
    sink: &mut S,
    summary: &mut RetrievalSummary,
) -> Result<(), RetrievalError> {
    for pulse_id in range.iter() {
        let frame = assembler.get_image(pulse_id)?;
        let incomplete = frame.incomplete_modules();
        if !incomplete.is_empty() {
            spdlog::debug!("Pulse {pulse_id} is incomplete in modules {incomplete:?}");
            summary.n_incomplete_frames += 1;
        }
        sink.write_frame(&frame)?;
        summary.n_frames += 1;
        summary.n_bytes += (frame.metadata.len() + frame.payload.len()) as u64;
    }
    sink.finish()?;
    Ok(())
}

/// The assembler only sees a worker failing as silence; report what actually went wrong
fn root_cause(error: RetrievalError, worker_error: Option<IngestError>) -> RetrievalError {
    match (error, worker_error) {
        (
            RetrievalError::AssemblerError(
                AssemblerError::IngestTimeout { .. } | AssemblerError::IngestStopped { .. },
            ),
            Some(worker_error),
        ) => RetrievalError::IngestError(worker_error),
        (error, _) => {
            spdlog::error!("Retrieval job failed: {error}");
            error
        }
    }
}

/// Retrieve `[start_pulse_id, stop_pulse_id]` of a detector with default buffer and timeout settings
pub fn retrieve<S: FrameSink + ?Sized>(
    detector_root: &Path,
    n_modules: usize,
    start_pulse_id: u64,
    stop_pulse_id: u64,
    rate_multiplicator: u64,
    sink: &mut S,
) -> Result<RetrievalSummary, RetrievalError> {
    let config = Config {
        detector_root: detector_root.to_path_buf(),
        n_modules,
        start_pulse_id,
        stop_pulse_id,
        rate_multiplicator,
        ..Default::default()
    };
    RetrievalOrchestrator::new(config).run(sink)
}
