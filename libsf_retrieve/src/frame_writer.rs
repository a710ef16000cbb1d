use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::assembler::AssembledFrame;
use super::error::SinkError;
use super::retrieval::RetrievalSummary;

/// Destination of assembled frames.
///
/// The views handed to `write_frame` point into the ring buffer and are only valid for the
/// duration of the call.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &AssembledFrame<'_>) -> Result<(), SinkError>;

    /// Called once after the last frame of a successful job
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<F> FrameSink for F
where
    F: FnMut(&AssembledFrame<'_>) -> Result<(), SinkError>,
{
    fn write_frame(&mut self, frame: &AssembledFrame<'_>) -> Result<(), SinkError> {
        self(frame)
    }
}

/// A sink writing assembled frames one after another into a flat binary file.
///
/// Each record is `[pulse_id: u64 LE][all modules' metadata][all modules' payloads]`.
/// Frames go to a `.part` file next to the output, which is only renamed to the output path
/// by `finish`. A sink dropped before that removes the partial file, so a failed job
/// leaves nothing behind.
#[derive(Debug)]
pub struct RawFileSink {
    path: PathBuf,
    part_path: PathBuf,
    writer: Option<BufWriter<File>>,
    n_frames: u64,
    n_bytes: u64,
}

/// Path frames are written to until the sink is finished
pub fn part_path(output_path: &Path) -> PathBuf {
    let mut part = output_path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

impl RawFileSink {
    pub fn new(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let part_path = part_path(path);
        let writer = BufWriter::new(File::create(&part_path)?);
        Ok(Self {
            path: path.to_path_buf(),
            part_path,
            writer: Some(writer),
            n_frames: 0,
            n_bytes: 0,
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn get_n_frames(&self) -> u64 {
        self.n_frames
    }

    pub fn get_n_bytes(&self) -> u64 {
        self.n_bytes
    }

    fn get_writer(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        self.writer.as_mut().ok_or(SinkError::Finished)
    }
}

impl FrameSink for RawFileSink {
    fn write_frame(&mut self, frame: &AssembledFrame<'_>) -> Result<(), SinkError> {
        let writer = self.get_writer()?;
        writer.write_u64::<LittleEndian>(frame.pulse_id)?;
        writer.write_all(frame.metadata)?;
        writer.write_all(frame.payload)?;
        self.n_frames += 1;
        self.n_bytes += (8 + frame.metadata.len() + frame.payload.len()) as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let mut writer = self.writer.take().ok_or(SinkError::Finished)?;
        writer.flush()?;
        drop(writer);
        std::fs::rename(&self.part_path, &self.path)?;
        spdlog::info!(
            "Wrote {} frames ({}) to {}",
            self.n_frames,
            human_bytes::human_bytes(self.n_bytes as f64),
            self.path.display()
        );
        Ok(())
    }
}

impl Drop for RawFileSink {
    fn drop(&mut self) {
        // Still holding the writer means finish never ran
        if let Some(writer) = self.writer.take() {
            drop(writer);
            match std::fs::remove_file(&self.part_path) {
                Ok(()) => spdlog::warn!(
                    "Discarded {} unfinished frames in {}",
                    self.n_frames,
                    self.part_path.display()
                ),
                Err(e) => spdlog::error!(
                    "Could not remove partial output {}: {e}",
                    self.part_path.display()
                ),
            }
        }
    }
}

/// Path of the YAML summary stored next to an output file
pub fn summary_path(output_path: &Path) -> PathBuf {
    output_path.with_extension("yml")
}

/// Write the job summary as YAML next to the output file
pub fn write_summary(output_path: &Path, summary: &RetrievalSummary) -> Result<PathBuf, SinkError> {
    let path = summary_path(output_path);
    let yaml_str = serde_yaml::to_string(summary)?;
    std::fs::write(&path, yaml_str)?;
    Ok(path)
}
