//! User interface components.
//!
//! This module provides:
//! - CLI argument definitions
//! - Scan result output (JSON, text)

pub mod cli;
pub mod report;

pub use cli::Cli;
pub use report::{export_json, parse_json};
