//! Utility functions and helpers.

pub mod cancel;
pub mod hash;
pub mod logging;

pub use cancel::CancellationToken;
pub use hash::HashCalculator;
pub use logging::{init_logging, LogConfig};
