//! Fixtures for writing shard files the way the readout does
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use super::constants::{MODULE_N_PIXELS, N_PACKETS_PER_FRAME};
use super::locator::{FrameLocation, ModuleFrameLocator};
use super::module_frame::FrameMetadata;

/// Metadata of a complete frame for the given pulse and module
pub fn test_metadata(pulse_id: u64, module: usize) -> FrameMetadata {
    FrameMetadata {
        marker: 1,
        pulse_id,
        frame_index: pulse_id * 2,
        daq_rec: 0,
        n_recv_packets: N_PACKETS_PER_FRAME,
        module_id: module as u64,
    }
}

/// Write one frame whose pixels all hold `fill` into its shard, creating the file if needed
pub fn write_frame(
    root: &Path,
    module: usize,
    pulse_id: u64,
    metadata: &FrameMetadata,
    fill: u16,
) -> std::io::Result<FrameLocation> {
    let locator = ModuleFrameLocator::new(root, module + 1);
    let location = locator
        .locate(pulse_id, module)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    if let Some(parent) = location.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&location.path)?;

    let mut frame = Vec::with_capacity(crate::constants::FRAME_SIZE);
    metadata.write_to(&mut frame)?;
    for _ in 0..MODULE_N_PIXELS {
        frame.write_u16::<LittleEndian>(fill)?;
    }
    file.seek(SeekFrom::Start(location.byte_offset()))?;
    file.write_all(&frame)?;
    Ok(location)
}

/// Write complete frames for every module and pulse, module m filled with the value m
pub fn write_detector(root: &Path, n_modules: usize, pulse_ids: &[u64]) -> std::io::Result<()> {
    write_detector_with(root, n_modules, pulse_ids, |_, module| module as u16)
}

/// Write complete frames for every module and pulse, pixels filled with `fill(pulse_id, module)`
pub fn write_detector_with<F>(
    root: &Path,
    n_modules: usize,
    pulse_ids: &[u64],
    fill: F,
) -> std::io::Result<()>
where
    F: Fn(u64, usize) -> u16,
{
    for module in 0..n_modules {
        for &pulse_id in pulse_ids {
            write_frame(
                root,
                module,
                pulse_id,
                &test_metadata(pulse_id, module),
                fill(pulse_id, module),
            )?;
        }
    }
    Ok(())
}

/// Pixel value that differs for every pulse and module
pub fn pulse_fill(pulse_id: u64, module: usize) -> u16 {
    (pulse_id ^ module as u64) as u16
}
