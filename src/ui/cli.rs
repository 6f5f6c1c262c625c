//! Command-line interface definition.

use crate::core::types::RiskLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// persist-sentry: scan and risk-rank persistence mechanisms
#[derive(Parser, Debug)]
#[command(name = "persist-sentry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Use this configuration file instead of the default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan for persistence mechanisms
    Scan {
        /// Run only these probes (repeatable)
        #[arg(short, long = "probe", value_name = "NAME")]
        probes: Vec<String>,

        /// Write the JSON result to a file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Merge this threat-intel file before scanning
        #[arg(long)]
        intel: Option<PathBuf>,

        /// Hash and verify every artifact, not only suspicious ones
        #[arg(long)]
        hash_all: bool,

        /// Lowest risk shown in text output
        #[arg(long, value_enum, default_value_t = RiskLevel::Low)]
        min_risk: RiskLevel,
    },

    /// List the probes available on this platform
    Probes,

    /// Manage threat intel
    Intel {
        #[command(subcommand)]
        action: IntelAction,
    },

    /// Print a previously exported scan result
    Report {
        /// JSON file written by `scan --output`
        file: PathBuf,

        /// Lowest risk shown in text output
        #[arg(long, value_enum, default_value_t = RiskLevel::Low)]
        min_risk: RiskLevel,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show application information
    Info,
}

/// Threat-intel subcommands.
#[derive(Subcommand, Debug)]
pub enum IntelAction {
    /// Merge a JSON file of hashes, domains and publishers into the store
    Import {
        file: PathBuf,
    },

    /// Show what the store holds
    Show,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the configuration file location
    Path,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
