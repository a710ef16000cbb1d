use crossbeam::channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::constants::STOP_POLL_INTERVAL_MS;
use super::error::IngestError;
use super::frame_reader::ModuleFrameReader;
use super::locator::ModuleFrameLocator;
use super::pulse_alignment::PulseRange;
use super::ring_buffer::{ModuleLane, RingFrameBuffer};

/// Completion token sent by an ingest worker once a frame is fully in the ring buffer.
///
/// Only the ingest workers can create these, which is what lets the assembler trust that
/// the announced slot has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReady {
    pub(crate) pulse_id: u64,
}

impl FrameReady {
    pub fn pulse_id(&self) -> u64 {
        self.pulse_id
    }
}

/// The consumer side of an ingest: one capacity-1 channel per module, tied to the buffer
/// the workers write into.
#[derive(Debug)]
pub struct IngestStreams {
    pub(crate) buffer: Arc<RingFrameBuffer>,
    pub(crate) receivers: Vec<Receiver<FrameReady>>,
}

impl IngestStreams {
    pub fn get_n_modules(&self) -> usize {
        self.receivers.len()
    }
}

/// Result of trying to pass a token to the assembler
enum HandOff {
    Delivered,
    Stopped,
    ConsumerGone,
    TimedOut,
}

/// ParallelIngestCoordinator runs one ModuleFrameReader per module on its own thread.
///
/// Each worker walks the same pulse range, loads the frame into its module's regions of
/// the ring buffer and announces it through its own capacity-1 channel. A worker that
/// cannot hand off within the send timeout gives up; this is what ties disk throughput to
/// the pace of the consumer.
#[derive(Debug)]
pub struct ParallelIngestCoordinator {
    stop_flag: Arc<AtomicBool>,
    workers: Vec<JoinHandle<Result<u64, IngestError>>>,
}

impl ParallelIngestCoordinator {
    /// Launch one worker per module over `range`.
    ///
    /// Returns the coordinator (which owns the threads) and the streams the assembler consumes.
    pub fn start(
        buffer: &Arc<RingFrameBuffer>,
        locator: &ModuleFrameLocator,
        range: PulseRange,
        send_timeout: Duration,
    ) -> Result<(Self, IngestStreams), IngestError> {
        let n_modules = buffer.get_layout().get_n_modules();
        let mut coordinator = Self {
            stop_flag: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(n_modules),
        };
        let mut receivers = Vec::with_capacity(n_modules);

        // Claim every lane up front so a failure leaves no thread running
        let lanes = (0..n_modules)
            .map(|module| buffer.claim_lane(module))
            .collect::<Result<Vec<_>, _>>()?;

        for lane in lanes {
            let module = lane.get_module();
            let (tx, rx) = bounded::<FrameReady>(1);
            receivers.push(rx);
            let reader = ModuleFrameReader::new(locator.clone(), module);
            let stop_flag = Arc::clone(&coordinator.stop_flag);
            let handle = std::thread::Builder::new()
                .name(format!("ingest-M{module}"))
                .spawn(move || run_worker(reader, lane, range, tx, stop_flag, send_timeout))
                .map_err(IngestError::SpawnError)?;
            coordinator.workers.push(handle);
        }
        spdlog::info!(
            "Started {} ingest workers on {} for pulses {} to {} (step {})",
            n_modules,
            locator.get_detector_root().display(),
            range.start,
            range.stop,
            range.step
        );

        Ok((
            coordinator,
            IngestStreams {
                buffer: Arc::clone(buffer),
                receivers,
            },
        ))
    }

    /// Tell every worker to stop at its next iteration and join them all.
    ///
    /// Returns the outcome of each worker in module order: the number of frames it handed
    /// off, or the error that ended it. Safe to call more than once; later calls return
    /// an empty list.
    pub fn close(&mut self) -> Vec<Result<u64, IngestError>> {
        self.stop_flag.store(true, Ordering::Release);
        self.workers
            .drain(..)
            .enumerate()
            .map(|(module, worker)| match worker.join() {
                Ok(result) => result,
                Err(_) => {
                    spdlog::error!("An error occured joining the ingest worker of module {module}!");
                    Err(IngestError::WorkerPanicked(module))
                }
            })
            .collect()
    }
}

impl Drop for ParallelIngestCoordinator {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.close();
        }
    }
}

/// The loop of one ingest worker
fn run_worker(
    mut reader: ModuleFrameReader,
    mut lane: ModuleLane,
    range: PulseRange,
    tx: Sender<FrameReady>,
    stop_flag: Arc<AtomicBool>,
    send_timeout: Duration,
) -> Result<u64, IngestError> {
    let module = lane.get_module();
    let mut n_frames: u64 = 0;
    for pulse_id in range.iter() {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }

        // SAFETY: the assembler only views a slot after receiving this worker's token for it,
        // and the capacity-1 channel keeps this worker at most two pulses ahead of the
        // consumer. With at least 5 slots the slot written here is never the one being viewed.
        let (metadata, payload) = unsafe { lane.frame_regions_mut(pulse_id) };
        if let Err(source) = reader.load(pulse_id, metadata, payload) {
            spdlog::error!("Ingest worker for module {module} failed at pulse {pulse_id}: {source}");
            return Err(IngestError::Reader { module, source });
        }

        match hand_off(&tx, FrameReady { pulse_id }, send_timeout, &stop_flag) {
            HandOff::Delivered => n_frames += 1,
            HandOff::Stopped => break,
            HandOff::ConsumerGone => {
                spdlog::debug!("Consumer of module {module} is gone; stopping at pulse {pulse_id}");
                break;
            }
            HandOff::TimedOut => {
                spdlog::error!(
                    "Ingest worker for module {module} could not hand off pulse {pulse_id} within {:?}",
                    send_timeout
                );
                return Err(IngestError::BackpressureTimeout { module, pulse_id });
            }
        }
    }
    reader.close();
    spdlog::debug!("Ingest worker for module {module} finished after {n_frames} frames");
    Ok(n_frames)
}

/// Send a token, waiting at most `timeout` for the consumer to make room.
///
/// The stop flag is checked in between so shutdown does not wait out the full timeout.
fn hand_off(
    tx: &Sender<FrameReady>,
    mut token: FrameReady,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> HandOff {
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(STOP_POLL_INTERVAL_MS);
    loop {
        let wait = deadline.saturating_duration_since(Instant::now()).min(poll);
        match tx.send_timeout(token, wait) {
            Ok(()) => return HandOff::Delivered,
            Err(SendTimeoutError::Disconnected(_)) => return HandOff::ConsumerGone,
            Err(SendTimeoutError::Timeout(returned)) => {
                if stop_flag.load(Ordering::Acquire) {
                    return HandOff::Stopped;
                }
                if Instant::now() >= deadline {
                    return HandOff::TimedOut;
                }
                token = returned;
            }
        }
    }
}
