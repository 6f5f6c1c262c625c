//! Configuration management for persist-sentry.

use crate::core::error::{Error, Result};
use crate::core::types::RiskLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Probe execution settings
    #[serde(default)]
    pub scan: ScanConfig,
    /// Selective hashing settings
    #[serde(default)]
    pub hashing: HashingConfig,
    /// Threat intel settings
    #[serde(default)]
    pub intel: IntelConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigSave(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigSave(format!("Failed to write config file: {}", e)))
    }

    /// Load configuration from default location, or create default if not exists.
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    log::warn!("Failed to load config, using defaults: {}", e);
                }
            }
        }

        let config = Self::default();

        if let Err(e) = config.save(&config_path) {
            log::warn!("Failed to save default config: {}", e);
        }

        config
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }

    /// Get the application data directory.
    pub fn data_dir() -> PathBuf {
        #[cfg(windows)]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData"))
                .join("PersistSentry")
        }

        #[cfg(not(windows))]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("persist-sentry")
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scan.command_timeout_secs == 0 || self.scan.command_timeout_secs > 120 {
            return Err(Error::ConfigInvalid {
                field: "scan.command_timeout_secs".to_string(),
                message: "Must be between 1 and 120".to_string(),
            });
        }

        if self.hashing.threads == 0 {
            return Err(Error::ConfigInvalid {
                field: "hashing.threads".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.hashing.max_file_size_mb == 0 {
            return Err(Error::ConfigInvalid {
                field: "hashing.max_file_size_mb".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.logging.keep_logs_days == 0 {
            return Err(Error::ConfigInvalid {
                field: "logging.keep_logs_days".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Probe execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Timeout applied to every external command
    pub command_timeout_secs: u64,
    /// Probe names to skip
    pub disabled_probes: Vec<String>,
    /// Home directories to inspect in addition to the detected ones
    pub extra_home_dirs: Vec<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 10,
            disabled_probes: Vec::new(),
            extra_home_dirs: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Selective hashing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Only artifacts at or above this pass-1 risk are hashed
    pub min_risk: RiskLevel,
    /// Parallel hashing threads
    pub threads: usize,
    /// Skip files larger than this size (MB)
    pub max_file_size_mb: u64,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            min_risk: RiskLevel::Medium,
            threads: num_cpus().min(4),
            max_file_size_mb: 256,
        }
    }
}

impl HashingConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Threat intel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelConfig {
    /// Threat intel JSON file loaded at startup
    pub path: Option<PathBuf>,
}

impl IntelConfig {
    /// Get the effective threat intel file.
    pub fn intel_file(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("intel.json"))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Days to keep log files
    pub keep_logs_days: u32,
    /// Path for log files
    pub log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            keep_logs_days: 30,
            log_path: None,
        }
    }
}

impl LoggingConfig {
    /// Get the effective log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("logs"))
    }
}

/// Get the number of CPUs, with a reasonable default.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hashing.min_risk, RiskLevel::Medium);
        assert_eq!(config.scan.command_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_config.json");

        let mut config = Config::default();
        config.scan.disabled_probes.push("cron".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.scan.disabled_probes, vec!["cron".to_string()]);
        assert_eq!(
            loaded.scan.command_timeout_secs,
            config.scan.command_timeout_secs
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"hashing": {"min_risk": "low"}}"#).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.hashing.min_risk, RiskLevel::Low);
        assert_eq!(loaded.scan.command_timeout_secs, 10);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.scan.command_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hashing.threads = 0;
        assert!(config.validate().is_err());
    }
}
