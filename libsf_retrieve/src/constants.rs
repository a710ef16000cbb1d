// Shard layout. Written by the readout side, never changed here.
pub const FILE_MOD: u64 = 1000;
pub const FOLDER_MOD: u64 = 100_000;
pub const SHARD_FILE_EXTENSION: &str = "bin";

// Module geometry
pub const MODULE_N_X_PIXEL: usize = 1024;
pub const MODULE_N_Y_PIXEL: usize = 512;
pub const MODULE_N_PIXELS: usize = MODULE_N_X_PIXEL * MODULE_N_Y_PIXEL;
pub const PIXEL_N_BYTES: usize = 2;

/// Packed metadata record: marker (1 byte) followed by five u64 fields
pub const METADATA_SIZE: usize = 1 + 5 * 8;
pub const PAYLOAD_SIZE: usize = MODULE_N_PIXELS * PIXEL_N_BYTES;
pub const FRAME_SIZE: usize = METADATA_SIZE + PAYLOAD_SIZE;

/// Number of UDP packets the readout sends for one complete module frame
pub const N_PACKETS_PER_FRAME: u64 = 128;

// Ring buffer sizing
pub const MIN_BUFFER_SLOTS: usize = 5;
pub const DEFAULT_BUFFER_SLOTS: usize = 10;

// Timeouts (milliseconds)
pub const DEFAULT_INGEST_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_ASSEMBLY_TIMEOUT_MS: u64 = 1000;
/// How often a reader blocked on hand-off looks at the stop flag
pub const STOP_POLL_INTERVAL_MS: u64 = 100;

/// Nominal rate of the facility master pulse train in Hz
pub const FACILITY_PULSE_RATE: u64 = 100;
