//! Gateway backed by real child processes.

use super::{CommandGateway, CommandOutput, GatewayError};
use crate::utils::cancel::CancellationToken;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running child is polled for exit, timeout and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Spawns processes directly (no shell) and enforces timeouts.
#[derive(Debug, Clone, Default)]
pub struct SystemGateway {
    cancel: CancellationToken,
}

impl SystemGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway that force-terminates in-flight commands when `cancel` fires.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn spawn_error(tool: &str, err: std::io::Error) -> GatewayError {
        match err.kind() {
            ErrorKind::NotFound => GatewayError::ToolMissing(tool.to_string()),
            ErrorKind::PermissionDenied => GatewayError::PermissionDenied(tool.to_string()),
            _ => GatewayError::Io {
                tool: tool.to_string(),
                reason: err.to_string(),
            },
        }
    }

    /// Kill and reap a child that is being abandoned.
    fn terminate(child: &mut Child) {
        if let Err(e) = child.kill() {
            log::trace!("kill failed (child already exited?): {}", e);
        }
        if let Err(e) = child.wait() {
            log::warn!("Failed to reap child process {}: {}", child.id(), e);
        }
    }
}

/// Forward a pipe's bytes in chunks until EOF.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
    }
    rx
}

/// Gather drained output until the pipe closes or `deadline` passes.
///
/// A backgrounded descendant can hold the pipe open after the child exits;
/// whatever arrived before the deadline is kept.
fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant) -> String {
    let mut buf = Vec::new();
    loop {
        let wait = deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL);
        match rx.recv_timeout(wait) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline {
                    log::debug!("output pipe still open at deadline, keeping {} bytes", buf.len());
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

impl CommandGateway for SystemGateway {
    fn run(&self, argv: &[&str], timeout: Duration) -> Result<CommandOutput, GatewayError> {
        let (program, args) = argv.split_first().ok_or(GatewayError::EmptyCommand)?;
        let tool = program.to_string();

        log::trace!("exec {:?} (timeout {}s)", argv, timeout.as_secs());

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(&tool, e))?;

        // Pipes are drained concurrently so a chatty child never blocks on a full buffer.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if self.cancel.is_cancelled() {
                        Self::terminate(&mut child);
                        return Err(GatewayError::Cancelled(tool));
                    }
                    if Instant::now() >= deadline {
                        Self::terminate(&mut child);
                        return Err(GatewayError::Timeout {
                            tool,
                            secs: timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    Self::terminate(&mut child);
                    return Err(GatewayError::Io {
                        tool,
                        reason: e.to_string(),
                    });
                }
            }
        };

        let stdout = collect(&stdout, deadline);
        let stderr = collect(&stderr, deadline);

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_runs_argv_without_shell() {
        let gateway = SystemGateway::new();
        let output = gateway
            .run(&["echo", "a;b", "$(id)"], Duration::from_secs(5))
            .unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), "a;b $(id)");
    }

    #[test]
    fn test_missing_tool() {
        let gateway = SystemGateway::new();
        let err = gateway
            .run(&["definitely-not-a-real-tool-xyz"], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, GatewayError::ToolMissing(_)));
    }

    #[test]
    fn test_nonzero_exit_is_output() {
        let gateway = SystemGateway::new();
        let output = gateway.run(&["false"], Duration::from_secs(5)).unwrap();
        assert_ne!(output.exit_code, 0);
    }

    #[test]
    fn test_timeout_kills_child() {
        let gateway = SystemGateway::new();
        let start = Instant::now();
        let err = gateway
            .run(&["sleep", "30"], Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancellation_terminates_child() {
        let token = CancellationToken::new();
        token.cancel();
        let gateway = SystemGateway::with_cancel(token);
        let err = gateway
            .run(&["sleep", "30"], Duration::from_secs(20))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled(_)));
    }

    #[test]
    fn test_background_descendant_does_not_hold_run() {
        let gateway = SystemGateway::new();
        let start = Instant::now();
        let output = gateway
            .run(&["sh", "-c", "sleep 30 & echo started"], Duration::from_secs(1))
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(output.stdout.trim(), "started");
    }

    #[test]
    fn test_empty_argv() {
        let gateway = SystemGateway::new();
        assert_eq!(
            gateway.run(&[], Duration::from_secs(1)).unwrap_err(),
            GatewayError::EmptyCommand
        );
    }
}
