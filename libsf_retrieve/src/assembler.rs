use byteorder::{ByteOrder, LittleEndian};
use crossbeam::channel::RecvTimeoutError;
use std::time::Duration;

use super::constants::{METADATA_SIZE, PAYLOAD_SIZE, PIXEL_N_BYTES};
use super::error::AssemblerError;
use super::ingest::IngestStreams;
use super::module_frame::FrameMetadata;

/// All modules' frames of one pulse, borrowed straight out of the ring buffer.
///
/// `metadata` holds the modules' metadata records back to back, `payload` the modules'
/// pixel planes back to back, i.e. the full detector image. The views are only valid until
/// the next call to `FrameAssembler::get_image`; copy what needs to outlive that.
#[derive(Debug, Clone, Copy)]
pub struct AssembledFrame<'a> {
    pub pulse_id: u64,
    pub metadata: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> AssembledFrame<'a> {
    pub fn get_n_modules(&self) -> usize {
        self.metadata.len() / METADATA_SIZE
    }

    pub fn module_metadata_bytes(&self, module: usize) -> &'a [u8] {
        &self.metadata[module * METADATA_SIZE..(module + 1) * METADATA_SIZE]
    }

    /// Decoded metadata record of one module
    pub fn module_metadata(&self, module: usize) -> FrameMetadata {
        // The slice always has exactly METADATA_SIZE bytes
        FrameMetadata::from_bytes(self.module_metadata_bytes(module)).unwrap_or_default()
    }

    pub fn module_payload(&self, module: usize) -> &'a [u8] {
        &self.payload[module * PAYLOAD_SIZE..(module + 1) * PAYLOAD_SIZE]
    }

    /// Row-major pixel values of one module
    pub fn module_pixels(&self, module: usize) -> impl Iterator<Item = u16> + 'a {
        self.module_payload(module)
            .chunks_exact(PIXEL_N_BYTES)
            .map(LittleEndian::read_u16)
    }

    /// Modules whose frame is missing packets or belongs to another pulse
    pub fn incomplete_modules(&self) -> Vec<usize> {
        (0..self.get_n_modules())
            .filter(|&module| !self.module_metadata(module).is_complete(self.pulse_id))
            .collect()
    }
}

/// FrameAssembler is the single consumer of an ingest.
///
/// For each pulse it waits until every module has announced the frame, checks all modules
/// agree on the pulse id, and returns zero-copy views of the assembled slot.
#[derive(Debug)]
pub struct FrameAssembler {
    streams: Option<IngestStreams>,
    timeout: Duration,
}

impl FrameAssembler {
    pub fn new(streams: IngestStreams, timeout: Duration) -> Self {
        Self {
            streams: Some(streams),
            timeout,
        }
    }

    /// Wait for every module to deliver `pulse_id` and return the assembled views.
    ///
    /// Fails with `IngestTimeout` if a module stays silent for longer than the timeout and
    /// with `Synchronization` if a module announces a different pulse. Both are fatal for
    /// the job: the module streams can no longer be trusted to line up.
    pub fn get_image(&mut self, pulse_id: u64) -> Result<AssembledFrame<'_>, AssemblerError> {
        let streams = self.streams.as_ref().ok_or(AssemblerError::Closed)?;
        for (module, rx) in streams.receivers.iter().enumerate() {
            let token = match rx.recv_timeout(self.timeout) {
                Ok(token) => token,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AssemblerError::IngestTimeout { module, pulse_id })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AssemblerError::IngestStopped { module, pulse_id })
                }
            };
            if token.pulse_id() != pulse_id {
                spdlog::error!(
                    "Module {module} delivered pulse {} while assembling pulse {pulse_id}",
                    token.pulse_id()
                );
                return Err(AssemblerError::Synchronization {
                    module,
                    expected: pulse_id,
                    found: token.pulse_id(),
                });
            }
        }

        // SAFETY: every module's worker has sent its token for pulse_id, so all writes to this
        // slot happened before the receive above. Workers only ever run a couple of pulses
        // ahead of the last token taken, and the returned views borrow self, so no further
        // tokens are drained (and no worker is released onto this slot) while they live.
        let (metadata, payload) = unsafe { streams.buffer.slot_view(pulse_id) };
        Ok(AssembledFrame {
            pulse_id,
            metadata,
            payload,
        })
    }

    /// Release the channels. Workers still waiting to hand off see the disconnect and stop.
    pub fn close(&mut self) {
        if self.streams.take().is_some() {
            spdlog::debug!("FrameAssembler closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FrameReady, ParallelIngestCoordinator};
    use crate::locator::ModuleFrameLocator;
    use crate::pulse_alignment::PulseRange;
    use crate::ring_buffer::RingFrameBuffer;
    use crate::test_utils::{pulse_fill, write_detector, write_detector_with};
    use crossbeam::channel::{bounded, Sender};
    use std::sync::Arc;
    use std::time::Instant;

    /// Streams over an empty buffer, fed by hand
    fn manual_streams(n_modules: usize) -> (IngestStreams, Vec<Sender<FrameReady>>) {
        let buffer = Arc::new(RingFrameBuffer::new(n_modules, 5).unwrap());
        let (senders, receivers) = (0..n_modules).map(|_| bounded::<FrameReady>(1)).unzip();
        (IngestStreams { buffer, receivers }, senders)
    }

    #[test]
    fn test_matching_tokens_assemble() {
        let (streams, senders) = manual_streams(3);
        let mut assembler = FrameAssembler::new(streams, Duration::from_millis(500));
        for tx in senders.iter() {
            tx.send(FrameReady { pulse_id: 42 }).unwrap();
        }
        let frame = assembler.get_image(42).unwrap();
        assert_eq!(frame.pulse_id, 42);
        assert_eq!(frame.get_n_modules(), 3);
        assert_eq!(frame.payload.len(), 3 * PAYLOAD_SIZE);
    }

    #[test]
    fn test_mismatched_token() {
        let (streams, senders) = manual_streams(3);
        let mut assembler = FrameAssembler::new(streams, Duration::from_millis(500));
        senders[0].send(FrameReady { pulse_id: 7 }).unwrap();
        senders[1].send(FrameReady { pulse_id: 8 }).unwrap();
        senders[2].send(FrameReady { pulse_id: 7 }).unwrap();
        assert!(matches!(
            assembler.get_image(7),
            Err(AssemblerError::Synchronization {
                module: 1,
                expected: 7,
                found: 8
            })
        ));
    }

    #[test]
    fn test_silent_producer_times_out() {
        let (streams, senders) = manual_streams(2);
        let mut assembler = FrameAssembler::new(streams, Duration::from_millis(100));
        senders[0].send(FrameReady { pulse_id: 3 }).unwrap();
        let began = Instant::now();
        assert!(matches!(
            assembler.get_image(3),
            Err(AssemblerError::IngestTimeout {
                module: 1,
                pulse_id: 3
            })
        ));
        assert!(began.elapsed() < Duration::from_secs(1));
        drop(senders);
    }

    #[test]
    fn test_stopped_producer() {
        let (streams, mut senders) = manual_streams(2);
        let mut assembler = FrameAssembler::new(streams, Duration::from_millis(500));
        senders[0].send(FrameReady { pulse_id: 3 }).unwrap();
        senders.truncate(1);
        assert!(matches!(
            assembler.get_image(3),
            Err(AssemblerError::IngestStopped { module: 1, .. })
        ));
    }

    #[test]
    fn test_closed_assembler() {
        let (streams, senders) = manual_streams(1);
        let mut assembler = FrameAssembler::new(streams, Duration::from_millis(100));
        assembler.close();
        assert!(senders[0].send(FrameReady { pulse_id: 1 }).is_err());
        assert!(matches!(assembler.get_image(1), Err(AssemblerError::Closed)));
    }

    #[test]
    fn test_assemble_three_modules() {
        let dir = tempfile::tempdir().unwrap();
        let pulses = [100, 101, 102];
        write_detector(dir.path(), 3, &pulses).unwrap();
        let buffer = Arc::new(RingFrameBuffer::new(3, 5).unwrap());
        let locator = ModuleFrameLocator::new(dir.path(), 3);
        let range = PulseRange::new(100, 102, 1).unwrap();
        let (mut coordinator, streams) = ParallelIngestCoordinator::start(
            &buffer,
            &locator,
            range,
            Duration::from_secs(1),
        )
        .unwrap();
        let mut assembler = FrameAssembler::new(streams, Duration::from_secs(1));

        for pulse_id in pulses {
            let frame = assembler.get_image(pulse_id).unwrap();
            for module in 0..3 {
                let meta = frame.module_metadata(module);
                assert_eq!(meta.pulse_id, pulse_id);
                assert_eq!(meta.module_id, module as u64);
                assert!(frame.module_pixels(module).all(|px| px == module as u16));
            }
            assert!(frame.incomplete_modules().is_empty());
            if pulse_id == 101 {
                // The detector image is the modules' planes back to back
                let image: Vec<u16> = frame
                    .payload
                    .chunks_exact(2)
                    .map(LittleEndian::read_u16)
                    .collect();
                for (module, plane) in image.chunks_exact(PAYLOAD_SIZE / 2).enumerate() {
                    assert!(plane.iter().all(|&px| px == module as u16));
                }
            }
        }
        assembler.close();
        for result in coordinator.close() {
            assert_eq!(result.unwrap(), 3);
        }
    }

    #[test]
    fn test_slot_reuse_at_minimum_slots() {
        // 40 pulses at stride 2 cycle a 5 slot ring eight times
        let dir = tempfile::tempdir().unwrap();
        let range = PulseRange::new(200, 278, 2).unwrap();
        let pulses: Vec<u64> = range.iter().collect();
        write_detector_with(dir.path(), 3, &pulses, pulse_fill).unwrap();
        let buffer = Arc::new(RingFrameBuffer::with_pulse_stride(3, 5, 2).unwrap());
        let locator = ModuleFrameLocator::new(dir.path(), 3);
        let (mut coordinator, streams) = ParallelIngestCoordinator::start(
            &buffer,
            &locator,
            range,
            Duration::from_secs(1),
        )
        .unwrap();
        let mut assembler = FrameAssembler::new(streams, Duration::from_secs(1));

        for &pulse_id in pulses.iter() {
            let frame = assembler.get_image(pulse_id).unwrap();
            // A slow consumer lets every worker run as far ahead as the channels allow
            std::thread::sleep(Duration::from_millis(10));
            for module in 0..3 {
                assert_eq!(frame.module_metadata(module).pulse_id, pulse_id);
                let fill = pulse_fill(pulse_id, module);
                assert!(
                    frame.module_pixels(module).all(|px| px == fill),
                    "stale pixels in module {module} at pulse {pulse_id}"
                );
            }
            assert!(frame.incomplete_modules().is_empty());
        }
        assembler.close();
        for result in coordinator.close() {
            assert_eq!(result.unwrap(), pulses.len() as u64);
        }
    }
}
