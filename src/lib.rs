//! persist-sentry: cross-platform persistence mechanism scanner
//!
//! Enumerates the places an operating system lets software start itself
//! (scheduled tasks, registry autoruns, services, launchd jobs, systemd
//! units, cron, shell profiles, browser extensions, Android accessibility
//! services and more), then ranks every entry by risk using token
//! heuristics, threat intel and code-signing state.

pub mod classifier;
pub mod core;
pub mod engine;
pub mod gateway;
pub mod intel;
pub mod parser;
pub mod probes;
pub mod signature;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use crate::core::config::Config;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::*;
pub use crate::engine::{Engine, EngineBuilder, EngineState};
