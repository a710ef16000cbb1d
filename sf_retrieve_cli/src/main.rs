//! # sf_retrieve_cli
//!
//! Part of the sf_retrieve crate family.
//!
//! This is the command line application to retrieve raw detector frames from the detector
//! buffer.
//!
//! ## Install
//!
//! Use `cargo install --path ./sf_retrieve_cli`
//!
//! ## Use
//!
//! Make a template configuration with
//!
//! ```bash
//! sf_retrieve_cli -p config.yml new
//! ```
//!
//! Fill out the fields and run the job with
//!
//! ```bash
//! sf_retrieve_cli -p config.yml
//! ```
//!
//! See the libsf_retrieve docs for the configuration and output formats.
use clap::{Arg, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsf_retrieve::assembler::AssembledFrame;
use libsf_retrieve::config::Config;
use libsf_retrieve::error::SinkError;
use libsf_retrieve::frame_writer::{write_summary, FrameSink, RawFileSink};
use libsf_retrieve::pulse_alignment::detector_pulse_range;
use libsf_retrieve::retrieval::{RetrievalOrchestrator, RetrievalSummary};

/// Raw file output that also moves the progress bar along
struct ProgressSink {
    inner: RawFileSink,
    pb: ProgressBar,
}

impl FrameSink for ProgressSink {
    fn write_frame(&mut self, frame: &AssembledFrame<'_>) -> Result<(), SinkError> {
        self.inner.write_frame(frame)?;
        self.pb.inc(1);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.inner.finish()
    }
}

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => (),
        Err(e) => spdlog::error!("Could not write template config: {e}"),
    }
}

fn setup_logging() {
    // Console output is kept, everything also goes to a log file
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./sf_retrieve.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .expect("Could not create log file!"),
    );
    let mut builder = spdlog::Logger::builder();
    builder
        .flush_level_filter(spdlog::LevelFilter::All)
        .sinks(spdlog::default_logger().sinks().to_owned())
        .sink(file_sink);
    let logger = Arc::new(builder.build().expect("Could not create logger!"));
    spdlog::set_default_logger(logger);
}

fn run_job(config: Config, pb: ProgressBar) -> Result<RetrievalSummary, String> {
    let output_path = config.output_path.clone();
    let mut sink = ProgressSink {
        inner: RawFileSink::new(&output_path).map_err(|e| e.to_string())?,
        pb,
    };
    // On failure the sink is dropped unfinished and removes its partial output
    let summary = RetrievalOrchestrator::new(config)
        .run(&mut sink)
        .map_err(|e| e.to_string())?;
    let summary_path =
        write_summary(sink.inner.get_path(), &summary).map_err(|e| e.to_string())?;
    spdlog::info!("Job summary written to {}", summary_path.display());
    Ok(summary)
}

fn main() {
    // Create a cli
    let matches = Command::new("sf_retrieve_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    setup_logging();

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        spdlog::info!("Done.");
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        spdlog::error!("{e}");
        return;
    }
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Detector Path: {}", config.detector_root.to_string_lossy());
    spdlog::info!("Output Path: {}", config.output_path.to_string_lossy());
    spdlog::info!("Number of Modules: {}", config.n_modules);
    spdlog::info!(
        "First Pulse: {} Last Pulse: {}",
        config.start_pulse_id,
        config.stop_pulse_id
    );
    spdlog::info!("Rate Multiplicator: {}", config.rate_multiplicator);
    if !config.does_detector_exist() {
        spdlog::warn!(
            "Not every module directory exists under {}; the job will fail at the first missing module",
            config.detector_root.to_string_lossy()
        );
    }

    // Setup the progress bar
    let n_frames = detector_pulse_range(
        config.start_pulse_id,
        config.stop_pulse_id,
        config.rate_multiplicator,
    )
    .ok()
    .flatten()
    .map(|range| range.len())
    .unwrap_or(0);
    let pb = ProgressBar::new(n_frames);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40} {pos}/{len} frames [{elapsed_precise}]")
    {
        pb.set_style(style);
    }
    let sent_pb = pb.clone();
    // Spawn the task!
    let handle = std::thread::spawn(move || run_job(config, sent_pb));

    match handle.join() {
        Ok(Ok(summary)) => spdlog::info!(
            "Successfully retrieved {} frames ({} incomplete)!",
            summary.n_frames,
            summary.n_incomplete_frames
        ),
        Ok(Err(e)) => spdlog::error!("Retrieval failed with error: {e}"),
        Err(_) => spdlog::error!("Failed to join retrieval task!"),
    }

    pb.finish();

    spdlog::info!("Done.");
}
