//! Error types and result handling for persist-sentry.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for persist-sentry operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== I/O Errors =====
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access directory: {path}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===== Configuration Errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    // ===== Threat Intel Errors =====
    #[error("Failed to load threat intel from {path}: {reason}")]
    IntelLoad { path: PathBuf, reason: String },

    #[error("Malformed threat intel file {path}: {reason}")]
    IntelInvalid { path: PathBuf, reason: String },

    // ===== Scan Errors =====
    #[error("Unknown probe: {0}")]
    UnknownProbe(String),

    #[error("Hashing failed: {path} - {reason}")]
    Hash { path: PathBuf, reason: String },

    // ===== Report Errors =====
    #[error("Report is inconsistent: {0}")]
    ReportInconsistent(String),

    // ===== Serialization Errors =====
    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    // ===== Generic Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a hashing error.
    pub fn hash(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Hash {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a threat intel load error.
    pub fn intel_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IntelLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable (scan can continue).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::FileRead { .. } | Error::Hash { .. })
    }

    /// Get a user-friendly suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::FileWrite { .. } | Error::DirectoryAccess { .. } => {
                Some("Check that the directory exists and is writable")
            }
            Error::ConfigLoad(_) | Error::ConfigInvalid { .. } => {
                Some("Check your configuration file for syntax errors or missing fields")
            }
            Error::IntelLoad { .. } | Error::IntelInvalid { .. } => {
                Some("Threat intel files are JSON: {\"hashes\": [], \"domains\": [], \"publishers\": []}")
            }
            Error::UnknownProbe(_) => Some("Run `persist-sentry probes` to list available probes"),
            Error::ReportInconsistent(_) => {
                Some("The report was edited or truncated; re-export it from a fresh scan")
            }
            _ => None,
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::FileRead { .. }
            | Error::FileWrite { .. }
            | Error::DirectoryAccess { .. }
            | Error::Io(_) => ErrorCategory::Io,

            Error::ConfigLoad(_) | Error::ConfigSave(_) | Error::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Error::IntelLoad { .. } | Error::IntelInvalid { .. } => ErrorCategory::Intel,

            Error::UnknownProbe(_) => ErrorCategory::Scanning,

            Error::Hash { .. } => ErrorCategory::Inspection,

            Error::ReportInconsistent(_) | Error::JsonSerialize(_) => {
                ErrorCategory::Serialization
            }

            Error::Internal(_) | Error::Other(_) => ErrorCategory::Other,
        }
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Io,
    Configuration,
    Intel,
    Scanning,
    Inspection,
    Serialization,
    Other,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "I/O"),
            Self::Configuration => write!(f, "Configuration"),
            Self::Intel => write!(f, "Threat Intel"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Inspection => write!(f, "Inspection"),
            Self::Serialization => write!(f, "Serialization"),
            Self::Other => write!(f, "Other"),
        }
    }
}
