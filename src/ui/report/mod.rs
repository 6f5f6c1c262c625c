//! Scan result output.
//!
//! - JSON export and validated import
//! - plain-text terminal summary

pub mod json;
pub mod text;

pub use json::{export_json, parse_json, read_json, write_json};
