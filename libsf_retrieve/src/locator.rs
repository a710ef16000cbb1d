use std::path::{Path, PathBuf};

use super::constants::{FILE_MOD, FOLDER_MOD, FRAME_SIZE, SHARD_FILE_EXTENSION};
use super::error::LocatorError;

/// First pulse id of the folder holding `pulse_id`
pub fn folder_base(pulse_id: u64) -> u64 {
    pulse_id / FOLDER_MOD * FOLDER_MOD
}

/// First pulse id of the shard file holding `pulse_id`
pub fn file_base(pulse_id: u64) -> u64 {
    pulse_id / FILE_MOD * FILE_MOD
}

/// Where one module frame lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocation {
    pub path: PathBuf,
    pub file_base: u64,
    /// Position of the frame inside the shard, in frames
    pub frame_index: u64,
}

impl FrameLocation {
    /// Byte offset of the frame (metadata first) inside the shard
    pub fn byte_offset(&self) -> u64 {
        self.frame_index * FRAME_SIZE as u64
    }

    /// Recover the pulse id this location was computed for
    pub fn pulse_id(&self) -> u64 {
        self.file_base + self.frame_index
    }
}

/// ModuleFrameLocator maps (pulse id, module) to a shard file and an in-file index.
///
/// The layout is `{detector_root}/M{module}/{folder_base}/{file_base}.bin`, where each
/// file holds FILE_MOD consecutive pulses and each folder FOLDER_MOD pulses. No IO is done here.
#[derive(Debug, Clone)]
pub struct ModuleFrameLocator {
    detector_root: PathBuf,
    n_modules: usize,
}

impl ModuleFrameLocator {
    pub fn new(detector_root: &Path, n_modules: usize) -> Self {
        Self {
            detector_root: detector_root.to_path_buf(),
            n_modules,
        }
    }

    pub fn get_detector_root(&self) -> &Path {
        &self.detector_root
    }

    /// Directory holding all shards of one module
    pub fn module_directory(&self, module: usize) -> Result<PathBuf, LocatorError> {
        if module >= self.n_modules {
            return Err(LocatorError::ModuleOutOfRange {
                module,
                n_modules: self.n_modules,
            });
        }
        Ok(self.detector_root.join(format!("M{module}")))
    }

    pub fn locate(&self, pulse_id: u64, module: usize) -> Result<FrameLocation, LocatorError> {
        let file_base = file_base(pulse_id);
        let path = self
            .module_directory(module)?
            .join(folder_base(pulse_id).to_string())
            .join(format!("{file_base}.{SHARD_FILE_EXTENSION}"));
        Ok(FrameLocation {
            path,
            file_base,
            frame_index: pulse_id - file_base,
        })
    }
}
