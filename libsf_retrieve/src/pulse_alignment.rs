use serde::{Deserialize, Serialize};

use super::constants::FACILITY_PULSE_RATE;
use super::error::AlignmentError;

/// An inclusive pulse id range walked with a fixed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseRange {
    pub start: u64,
    pub stop: u64,
    pub step: u64,
}

impl PulseRange {
    pub fn new(start: u64, stop: u64, step: u64) -> Result<Self, AlignmentError> {
        if start > stop {
            return Err(AlignmentError::InvertedRange { start, stop });
        }
        if step == 0 {
            return Err(AlignmentError::InvalidRateMultiplicator(step));
        }
        Ok(Self { start, stop, step })
    }

    /// Pulse ids `start, start + step, ...` up to and including `stop`
    pub fn iter(&self) -> impl Iterator<Item = u64> {
        // step fits in usize for every accepted rate multiplicator
        (self.start..=self.stop).step_by(self.step.max(1) as usize)
    }

    /// Number of pulses the range yields
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (self.stop - self.start) / self.step.max(1) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.stop
    }
}

/// A rate multiplicator must be positive and divide the facility pulse rate
pub fn validate_rate_multiplicator(rate_multiplicator: u64) -> Result<(), AlignmentError> {
    if rate_multiplicator == 0 || FACILITY_PULSE_RATE % rate_multiplicator != 0 {
        return Err(AlignmentError::InvalidRateMultiplicator(rate_multiplicator));
    }
    Ok(())
}

/// Widen a requested inclusive range so a rate-reduced acquisition is not clipped at its edges.
///
/// A boundary that lands exactly on a multiple of the rate multiplicator is pushed outward
/// by one pulse: start is decremented, stop is incremented.
pub fn widen_request_range(
    start: u64,
    stop: u64,
    rate_multiplicator: u64,
) -> Result<(u64, u64), AlignmentError> {
    validate_rate_multiplicator(rate_multiplicator)?;
    if start > stop {
        return Err(AlignmentError::InvertedRange { start, stop });
    }
    let mut start = start;
    let mut stop = stop;
    if start % rate_multiplicator == 0 {
        start = start.saturating_sub(1);
    }
    if stop % rate_multiplicator == 0 {
        stop = stop.saturating_add(1);
    }
    Ok((start, stop))
}

/// Find the first and last pulse ids inside `[start, stop]` the detector actually recorded.
///
/// The detector records every pulse divisible by the rate multiplicator. Returns `None` if
/// no such pulse lies inside the range; the range is then valid but empty.
pub fn detector_pulse_range(
    start: u64,
    stop: u64,
    rate_multiplicator: u64,
) -> Result<Option<PulseRange>, AlignmentError> {
    validate_rate_multiplicator(rate_multiplicator)?;
    if start > stop {
        return Err(AlignmentError::InvertedRange { start, stop });
    }
    let det_start = match start.checked_next_multiple_of(rate_multiplicator) {
        Some(det_start) if det_start <= stop => det_start,
        _ => return Ok(None),
    };
    let det_stop = stop / rate_multiplicator * rate_multiplicator;
    Ok(Some(PulseRange {
        start: det_start,
        stop: det_stop,
        step: rate_multiplicator,
    }))
}
