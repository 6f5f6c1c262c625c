//! Gateway that replays canned responses, for tests and offline analysis.

use super::{CommandGateway, CommandOutput, GatewayError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Responds to exact argument vectors with pre-recorded output.
///
/// Commands without a script behave as if the tool were not installed.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    responses: HashMap<Vec<String>, Result<CommandOutput, GatewayError>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(argv: &[&str]) -> Vec<String> {
        argv.iter().map(|s| s.to_string()).collect()
    }

    /// Script a successful run printing `stdout`.
    pub fn on(mut self, argv: &[&str], stdout: impl Into<String>) -> Self {
        self.responses
            .insert(Self::key(argv), Ok(CommandOutput::success(stdout)));
        self
    }

    /// Script an arbitrary output (non-zero exit, stderr...).
    pub fn on_output(mut self, argv: &[&str], output: CommandOutput) -> Self {
        self.responses.insert(Self::key(argv), Ok(output));
        self
    }

    /// Script a gateway failure.
    pub fn on_error(mut self, argv: &[&str], error: GatewayError) -> Self {
        self.responses.insert(Self::key(argv), Err(error));
        self
    }

    /// Every argument vector seen so far, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Number of calls whose program is `tool`.
    pub fn call_count(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|argv| argv.first().map(String::as_str) == Some(tool))
            .count()
    }
}

impl CommandGateway for ScriptedGateway {
    fn run(&self, argv: &[&str], _timeout: Duration) -> Result<CommandOutput, GatewayError> {
        let program = argv.first().ok_or(GatewayError::EmptyCommand)?;
        let key = Self::key(argv);
        self.calls.lock().push(key.clone());

        match self.responses.get(&key) {
            Some(response) => response.clone(),
            None => Err(GatewayError::ToolMissing(program.to_string())),
        }
    }
}
