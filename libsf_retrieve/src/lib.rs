//! # sf_retrieve
//!
//! sf_retrieve pulls raw detector frames back out of the detector buffer, written in Rust.
//! Pixel detectors write every module's frames to a sharded on-disk buffer, indexed by the
//! facility pulse id. For a requested pulse range sf_retrieve reads every module in
//! parallel, synchronizes the modules per pulse, and hands out full detector images
//! without ever holding more than a handful of frames in memory.
//!
//! ## Building & Install
//!
//! To build and install the CLI use `cargo install --path ./sf_retrieve_cli` from the top
//! level repository.
//!
//! ## Detector Buffer Layout
//!
//! Each module `M` has its own directory under the detector root. Frames are grouped in
//! folders of 100000 pulses and files of 1000 pulses:
//!
//! ```text
//! JF07T32V01
//! |---- M0
//! |    |---- 12300000
//! |    |    |---- 12345000.bin
//! |    |    |---- 12346000.bin
//! |---- M1
//! ```
//!
//! A file holds 1000 consecutive records of `[metadata (41 bytes)][payload (1 MiB)]`. The
//! metadata is packed little-endian:
//!
//! ```text
//! marker: u8, pulse_id: u64, frame_index: u64, daq_rec: u64, n_recv_packets: u64, module_id: u64
//! ```
//!
//! The payload is a 512 x 1024 plane of u16 pixels, row major.
//!
//! ## Configuration
//!
//! A retrieval job is described by a YAML file. A template can be made with the CLI `new`
//! subcommand. The format is as follows:
//!
//! ```yml
//! detector_root: /gpfs/photonics/swissfel/buffer/JF07T32V01
//! n_modules: 32
//! n_slots: 10
//! ingest_timeout_ms: 1000
//! assembly_timeout_ms: 1000
//! start_pulse_id: 12345000
//! stop_pulse_id: 12346000
//! rate_multiplicator: 1
//! output_path: /sf/data/run_0001.bin
//! ```
//!
//! `rate_multiplicator` is the ratio of the facility rate (100 Hz) to the detector rate. A
//! detector running at 10 Hz has a multiplicator of 10 and only records pulse ids which
//! are multiples of 10; only those pulses are retrieved.
//!
//! ## Output
//!
//! The CLI writes two files and a log file. The data file is a sequence of records, one per
//! retrieved pulse:
//!
//! ```text
//! [pulse_id: u64][metadata of M0..Mn-1][payload of M0..Mn-1]
//! ```
//!
//! Frames are written to `<output>.part` while the job runs; the file is only renamed to the
//! output path once every frame was written, and removed if the job fails.
//!
//! Next to it a `.yml` summary of the job is written (requested range, detector pulses
//! retrieved, number of frames and of incomplete frames). The log file `sf_retrieve.log`
//! is written to the working directory.
pub mod assembler;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame_reader;
pub mod frame_writer;
pub mod ingest;
pub mod locator;
pub mod module_frame;
pub mod pulse_alignment;
pub mod retrieval;
pub mod ring_buffer;

#[cfg(test)]
mod test_utils;
