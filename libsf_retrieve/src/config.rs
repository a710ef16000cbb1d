use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::{
    DEFAULT_ASSEMBLY_TIMEOUT_MS, DEFAULT_BUFFER_SLOTS, DEFAULT_INGEST_TIMEOUT_MS, MIN_BUFFER_SLOTS,
};
use super::error::ConfigError;
use super::locator::ModuleFrameLocator;
use super::pulse_alignment::validate_rate_multiplicator;

fn default_n_slots() -> usize {
    DEFAULT_BUFFER_SLOTS
}

fn default_ingest_timeout_ms() -> u64 {
    DEFAULT_INGEST_TIMEOUT_MS
}

fn default_assembly_timeout_ms() -> u64 {
    DEFAULT_ASSEMBLY_TIMEOUT_MS
}

fn default_rate_multiplicator() -> u64 {
    1
}

/// Structure representing one retrieval job. Contains pathing, detector and pulse range information.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detector_root: PathBuf,
    pub n_modules: usize,
    #[serde(default = "default_n_slots")]
    pub n_slots: usize,
    #[serde(default = "default_ingest_timeout_ms")]
    pub ingest_timeout_ms: u64,
    #[serde(default = "default_assembly_timeout_ms")]
    pub assembly_timeout_ms: u64,
    pub start_pulse_id: u64,
    pub stop_pulse_id: u64,
    #[serde(default = "default_rate_multiplicator")]
    pub rate_multiplicator: u64,
    pub output_path: PathBuf,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            detector_root: PathBuf::from("None"),
            n_modules: 1,
            n_slots: DEFAULT_BUFFER_SLOTS,
            ingest_timeout_ms: DEFAULT_INGEST_TIMEOUT_MS,
            assembly_timeout_ms: DEFAULT_ASSEMBLY_TIMEOUT_MS,
            start_pulse_id: 0,
            stop_pulse_id: 0,
            rate_multiplicator: 1,
            output_path: PathBuf::from("None"),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check every value is usable before a job is started
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_modules == 0 {
            return Err(ConfigError::InvalidValue {
                field: "n_modules",
                reason: String::from("a detector needs at least one module"),
            });
        }
        if self.n_slots < MIN_BUFFER_SLOTS {
            return Err(ConfigError::InvalidValue {
                field: "n_slots",
                reason: format!("at least {MIN_BUFFER_SLOTS} slots are required, got {}", self.n_slots),
            });
        }
        if self.ingest_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingest_timeout_ms",
                reason: String::from("must be positive"),
            });
        }
        if self.assembly_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "assembly_timeout_ms",
                reason: String::from("must be positive"),
            });
        }
        if self.start_pulse_id > self.stop_pulse_id {
            return Err(ConfigError::InvalidValue {
                field: "start_pulse_id",
                reason: format!(
                    "start {} is after stop {}",
                    self.start_pulse_id, self.stop_pulse_id
                ),
            });
        }
        validate_rate_multiplicator(self.rate_multiplicator)?;
        Ok(())
    }

    /// Number of ring buffer slots a job actually allocates
    pub fn effective_n_slots(&self) -> usize {
        self.n_slots.max(DEFAULT_BUFFER_SLOTS)
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }

    pub fn assembly_timeout(&self) -> Duration {
        Duration::from_millis(self.assembly_timeout_ms)
    }

    /// Check that the detector has data on disk, by evaluating the existance of every module directory
    pub fn does_detector_exist(&self) -> bool {
        let locator = ModuleFrameLocator::new(&self.detector_root, self.n_modules);
        (0..self.n_modules).all(|module| {
            locator
                .module_directory(module)
                .is_ok_and(|directory| directory.exists())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlignmentError;

    #[test]
    fn test_defaults_from_yaml() {
        let yaml = "detector_root: /gpfs/photonics/swissfel/buffer/JF07T32V01\n\
                    n_modules: 32\n\
                    start_pulse_id: 1000\n\
                    stop_pulse_id: 2000\n\
                    output_path: /tmp/out.bin\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.n_slots, DEFAULT_BUFFER_SLOTS);
        assert_eq!(config.rate_multiplicator, 1);
        assert_eq!(config.ingest_timeout(), Duration::from_secs(1));
        assert_eq!(config.assembly_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            n_modules: 4,
            rate_multiplicator: 10,
            ..Default::default()
        };
        config.write_config_file(&path).unwrap();
        let loaded = Config::read_config_file(&path).unwrap();
        assert_eq!(loaded.n_modules, 4);
        assert_eq!(loaded.rate_multiplicator, 10);
        assert!(matches!(
            Config::read_config_file(&dir.path().join("missing.yml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        let bad_slots = Config {
            n_slots: 4,
            ..Default::default()
        };
        assert!(matches!(
            bad_slots.validate(),
            Err(ConfigError::InvalidValue { field: "n_slots", .. })
        ));
        let bad_rate = Config {
            rate_multiplicator: 3,
            ..Default::default()
        };
        assert!(matches!(
            bad_rate.validate(),
            Err(ConfigError::AlignmentError(
                AlignmentError::InvalidRateMultiplicator(3)
            ))
        ));
        let no_modules = Config {
            n_modules: 0,
            ..Default::default()
        };
        assert!(no_modules.validate().is_err());
        let inverted = Config {
            start_pulse_id: 10,
            stop_pulse_id: 5,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_effective_slots() {
        let config = Config {
            n_slots: 5,
            ..Default::default()
        };
        assert_eq!(config.effective_n_slots(), 10);
        let config = Config {
            n_slots: 16,
            ..Default::default()
        };
        assert_eq!(config.effective_n_slots(), 16);
    }

    #[test]
    fn test_detector_exists() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            detector_root: dir.path().to_path_buf(),
            n_modules: 2,
            ..Default::default()
        };
        assert!(!config.does_detector_exist());
        let locator = ModuleFrameLocator::new(dir.path(), 2);
        std::fs::create_dir_all(locator.module_directory(0).unwrap()).unwrap();
        assert!(!config.does_detector_exist());
        std::fs::create_dir_all(locator.module_directory(1).unwrap()).unwrap();
        assert!(config.does_detector_exist());
    }
}
