//! Logging setup on top of `env_logger`.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "persist-sentry.log";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    /// Append to this file instead of writing to stderr
    pub file_path: Option<PathBuf>,
    pub timestamps: bool,
    pub module_path: bool,
    /// ANSI colors on the level tag (console only)
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Warn,
            file_path: None,
            timestamps: true,
            module_path: false,
            color: true,
        }
    }
}

impl LogConfig {
    /// Create a log config from application config.
    pub fn from_config(config: &Config) -> Self {
        let level = parse_level(&config.logging.log_level);
        Self {
            level,
            file_path: config
                .logging
                .log_path
                .as_ref()
                .map(|_| config.logging.log_dir().join(LOG_FILE_NAME)),
            timestamps: true,
            module_path: level >= LevelFilter::Debug,
            color: config.logging.log_path.is_none(),
        }
    }

    /// Create a verbose log config for CLI.
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::Debug,
            module_path: true,
            ..Self::default()
        }
    }
}

/// Map a config string to a level filter, defaulting to warn.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

/// Initialize the logging system. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(config.level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    let color = config.color && config.file_path.is_none();
    let timestamps = config.timestamps;
    let module_path = config.module_path;

    builder.format(move |buf, record| {
        let mut output = String::new();

        if timestamps {
            output.push_str(&format!("{} ", Local::now().format("%Y-%m-%d %H:%M:%S")));
        }

        let level_str = match (record.level(), color) {
            (log::Level::Error, true) => "\x1b[31mERROR\x1b[0m",
            (log::Level::Warn, true) => "\x1b[33mWARN\x1b[0m ",
            (log::Level::Info, true) => "\x1b[32mINFO\x1b[0m ",
            (log::Level::Debug, true) => "\x1b[34mDEBUG\x1b[0m",
            (log::Level::Trace, true) => "\x1b[35mTRACE\x1b[0m",
            (log::Level::Error, false) => "ERROR",
            (log::Level::Warn, false) => "WARN ",
            (log::Level::Info, false) => "INFO ",
            (log::Level::Debug, false) => "DEBUG",
            (log::Level::Trace, false) => "TRACE",
        };
        output.push_str(&format!("[{}] ", level_str));

        if module_path {
            if let Some(path) = record.module_path() {
                output.push_str(&format!("{}: ", path));
            }
        }

        output.push_str(&format!("{}", record.args()));
        writeln!(buf, "{}", output)
    });

    if let Some(ref path) = config.file_path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::file_write(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::file_write(path, e))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    // A second init (tests, embedding) keeps the first logger.
    if builder.try_init().is_err() {
        log::trace!("logger already initialized");
    }

    log::debug!("Logging initialized with level: {:?}", config.level);
    Ok(())
}

/// Delete `.log` files older than `keep_days`.
pub fn cleanup_old_logs(log_dir: &Path, keep_days: u32) -> Result<u32> {
    use std::time::{Duration, SystemTime};

    let cutoff = SystemTime::now() - Duration::from_secs(keep_days as u64 * 24 * 60 * 60);
    let mut deleted = 0u32;

    if !log_dir.exists() {
        return Ok(0);
    }

    let entries = fs::read_dir(log_dir).map_err(|e| Error::DirectoryAccess {
        path: log_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();

        if path.extension().is_some_and(|ext| ext == "log") {
            if let Ok(metadata) = entry.metadata() {
                if let Ok(modified) = metadata.modified() {
                    if modified < cutoff && fs::remove_file(&path).is_ok() {
                        log::debug!("Deleted old log file: {:?}", path);
                        deleted += 1;
                    }
                }
            }
        }
    }

    if deleted > 0 {
        log::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(deleted)
}
