//! Process/command gateway.
//!
//! Every external OS utility is invoked through [`CommandGateway`], which
//! takes an argument vector (never a shell string) and an explicit timeout.
//! - [`SystemGateway`] spawns real processes and always reaps them
//! - [`ScriptedGateway`] replays canned output for tests

pub mod scripted;
pub mod system;

pub use scripted::ScriptedGateway;
pub use system::SystemGateway;

use std::time::Duration;
use thiserror::Error;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failure to run a command to completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("empty argument vector")]
    EmptyCommand,

    #[error("tool not found: {0}")]
    ToolMissing(String),

    #[error("permission denied running {0}")]
    PermissionDenied(String),

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("failed to run {tool}: {reason}")]
    Io { tool: String, reason: String },
}

/// Runs external utilities on behalf of probes and the signature oracle.
pub trait CommandGateway: Send + Sync {
    /// Run `argv[0]` with the remaining arguments, bounded by `timeout`.
    fn run(&self, argv: &[&str], timeout: Duration) -> Result<CommandOutput, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_helpers() {
        assert!(CommandOutput::success("ok").is_success());
        let failed = CommandOutput::failure(2, "boom");
        assert!(!failed.is_success());
        assert_eq!(failed.stderr, "boom");
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::Timeout {
            tool: "schtasks".into(),
            secs: 10,
        };
        assert_eq!(err.to_string(), "schtasks timed out after 10s");
    }
}
