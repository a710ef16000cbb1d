//! Fixed-capacity frame arena shared between the ingest workers and the assembler.
//!
//! # Memory Layout
//! ```text
//! arena: [slot 0][slot 1] ... [slot n_slots-1]
//! slot:  [meta M0][meta M1] ... [meta Mn-1][payload M0][payload M1] ... [payload Mn-1]
//! ```
//!
//! Every offset is computed in closed form from the module count and the fixed record
//! sizes, so all modules' metadata for one pulse and all modules' payloads for one pulse are
//! contiguous. The assembler can therefore hand out the full detector image without copying.
//!
//! # Ownership
//! The arena is allocated once and only ever touched through raw pointers. Two kinds of
//! borrows are handed out:
//! - a `ModuleLane` per module, which is the only way to write into that module's regions.
//!   At most one lane per module exists at a time, so concurrent writers never overlap.
//! - read-only views of a full slot, used by the assembler once every module has reported
//!   the slot as written.
//!
//! Keeping readers and writers apart in time is the job of the hand-off protocol between
//! `ingest` and `assembler`, see the safety notes on the unsafe methods below.
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::constants::{FRAME_SIZE, METADATA_SIZE, MIN_BUFFER_SLOTS, PAYLOAD_SIZE};
use super::error::BufferError;

/// Which part of a module frame a region holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Metadata,
    Payload,
}

/// Closed-form addressing of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    n_modules: usize,
    n_slots: usize,
    pulse_stride: u64,
}

impl SlotLayout {
    pub fn get_n_modules(&self) -> usize {
        self.n_modules
    }

    pub fn get_n_slots(&self) -> usize {
        self.n_slots
    }

    pub fn get_pulse_stride(&self) -> u64 {
        self.pulse_stride
    }

    pub fn slot_size(&self) -> usize {
        self.n_modules * FRAME_SIZE
    }

    pub fn arena_size(&self) -> usize {
        self.n_slots * self.slot_size()
    }

    /// Slot holding `pulse_id`. With a stride of 1 this is `pulse_id mod n_slots`.
    pub fn slot_index(&self, pulse_id: u64) -> usize {
        ((pulse_id / self.pulse_stride) % self.n_slots as u64) as usize
    }

    /// Metadata of all modules of one slot, contiguous
    pub fn slot_metadata_range(&self, slot: usize) -> Range<usize> {
        let start = slot * self.slot_size();
        start..start + self.n_modules * METADATA_SIZE
    }

    /// Payloads of all modules of one slot, contiguous
    pub fn slot_payload_range(&self, slot: usize) -> Range<usize> {
        let start = slot * self.slot_size() + self.n_modules * METADATA_SIZE;
        start..start + self.n_modules * PAYLOAD_SIZE
    }

    pub fn region(&self, slot: usize, module: usize, kind: RegionKind) -> Range<usize> {
        match kind {
            RegionKind::Metadata => {
                let start = self.slot_metadata_range(slot).start + module * METADATA_SIZE;
                start..start + METADATA_SIZE
            }
            RegionKind::Payload => {
                let start = self.slot_payload_range(slot).start + module * PAYLOAD_SIZE;
                start..start + PAYLOAD_SIZE
            }
        }
    }
}

/// RingFrameBuffer owns the frame arena of one retrieval job.
///
/// It holds `n_modules x n_slots` frames and is addressed by pulse id. Slots are reused
/// every `n_slots` pulses (times the pulse stride), so the buffer never grows with the
/// length of the acquisition.
#[derive(Debug)]
pub struct RingFrameBuffer {
    layout: SlotLayout,
    arena: NonNull<[u8]>,
    lanes: Vec<AtomicBool>,
}

// SAFETY: The arena is a plain heap allocation owned by the buffer. Concurrent access only
// happens through ModuleLane (exclusive per module, so writers touch disjoint bytes) and
// slot_view, whose callers must keep it apart from writers of the same slot.
unsafe impl Send for RingFrameBuffer {}
unsafe impl Sync for RingFrameBuffer {}

impl RingFrameBuffer {
    /// Allocate a buffer addressed by `pulse_id mod n_slots`.
    ///
    /// Fails if `n_slots` is below MIN_BUFFER_SLOTS or `n_modules` is zero.
    pub fn new(n_modules: usize, n_slots: usize) -> Result<Self, BufferError> {
        Self::with_pulse_stride(n_modules, n_slots, 1)
    }

    /// Allocate a buffer for a pulse sequence advancing by `pulse_stride`.
    ///
    /// Slots are addressed by `(pulse_id / pulse_stride) mod n_slots`, so consecutive
    /// pulses of a rate-reduced detector land in consecutive slots.
    pub fn with_pulse_stride(
        n_modules: usize,
        n_slots: usize,
        pulse_stride: u64,
    ) -> Result<Self, BufferError> {
        if n_slots < MIN_BUFFER_SLOTS {
            return Err(BufferError::TooFewSlots(n_slots));
        }
        if n_modules == 0 {
            return Err(BufferError::NoModules);
        }
        if pulse_stride == 0 {
            return Err(BufferError::ZeroStride);
        }
        let size = n_modules
            .checked_mul(n_slots)
            .and_then(|frames| frames.checked_mul(FRAME_SIZE))
            .filter(|&size| size <= isize::MAX as usize)
            .ok_or(BufferError::TooLarge { n_modules, n_slots })?;

        let arena = NonNull::from(Box::leak(vec![0u8; size].into_boxed_slice()));
        spdlog::debug!(
            "Allocated RingFrameBuffer of {} ({} modules x {} slots)",
            human_bytes::human_bytes(size as f64),
            n_modules,
            n_slots
        );
        Ok(Self {
            layout: SlotLayout {
                n_modules,
                n_slots,
                pulse_stride,
            },
            arena,
            lanes: (0..n_modules).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn get_layout(&self) -> &SlotLayout {
        &self.layout
    }

    pub fn size_bytes(&self) -> usize {
        self.layout.arena_size()
    }

    /// Take the exclusive write handle for one module.
    ///
    /// The handle is returned to the buffer when dropped.
    pub(crate) fn claim_lane(self: &Arc<Self>, module: usize) -> Result<ModuleLane, BufferError> {
        let flag = self
            .lanes
            .get(module)
            .ok_or(BufferError::ModuleOutOfRange {
                module,
                n_modules: self.layout.n_modules,
            })?;
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BufferError::LaneClaimed(module))?;
        Ok(ModuleLane {
            buffer: Arc::clone(self),
            module,
        })
    }

    /// Read-only views of the metadata block and the payload block of the slot of `pulse_id`.
    ///
    /// # Safety
    /// No lane may write into this slot while the returned views are alive. Every write
    /// to the slot must happen-before this call (the ingest hand-off channel provides this).
    pub(crate) unsafe fn slot_view(&self, pulse_id: u64) -> (&[u8], &[u8]) {
        let slot = self.layout.slot_index(pulse_id);
        (
            self.region(self.layout.slot_metadata_range(slot)),
            self.region(self.layout.slot_payload_range(slot)),
        )
    }

    /// # Safety
    /// The range must be inside the arena and not written concurrently.
    unsafe fn region(&self, range: Range<usize>) -> &[u8] {
        debug_assert!(range.end <= self.layout.arena_size());
        let base = self.arena.as_ptr() as *const u8;
        std::slice::from_raw_parts(base.add(range.start), range.len())
    }

    /// # Safety
    /// The range must be inside the arena and not accessed by anyone else while the slice lives.
    #[allow(clippy::mut_from_ref)]
    unsafe fn region_mut(&self, range: Range<usize>) -> &mut [u8] {
        debug_assert!(range.end <= self.layout.arena_size());
        let base = self.arena.as_ptr() as *mut u8;
        std::slice::from_raw_parts_mut(base.add(range.start), range.len())
    }
}

impl Drop for RingFrameBuffer {
    fn drop(&mut self) {
        // SAFETY: arena came from Box::leak in the constructor and is released exactly once.
        // Lanes hold an Arc to the buffer, so none can outlive it.
        unsafe { drop(Box::from_raw(self.arena.as_ptr())) }
    }
}

/// Exclusive write handle to the regions of one module across all slots
#[derive(Debug)]
pub(crate) struct ModuleLane {
    buffer: Arc<RingFrameBuffer>,
    module: usize,
}

impl ModuleLane {
    pub(crate) fn get_module(&self) -> usize {
        self.module
    }

    /// Writable metadata and payload regions of this module in the slot of `pulse_id`.
    ///
    /// # Safety
    /// No view of the slot of `pulse_id` may be alive while the regions are in use.
    pub(crate) unsafe fn frame_regions_mut(&mut self, pulse_id: u64) -> (&mut [u8], &mut [u8]) {
        let layout = self.buffer.layout;
        let slot = layout.slot_index(pulse_id);
        (
            self.buffer
                .region_mut(layout.region(slot, self.module, RegionKind::Metadata)),
            self.buffer
                .region_mut(layout.region(slot, self.module, RegionKind::Payload)),
        )
    }
}

impl Drop for ModuleLane {
    fn drop(&mut self) {
        self.buffer.lanes[self.module].store(false, Ordering::Release);
    }
}
