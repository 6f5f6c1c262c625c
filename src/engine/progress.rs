//! Scan progress reporting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Phase a progress event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPhase {
    /// A probe finished; carries the probe name
    Probe(&'static str),
    Hashing,
    Completed,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanPhase::Probe(name) => write!(f, "{}", name),
            ScanPhase::Hashing => write!(f, "hashing"),
            ScanPhase::Completed => write!(f, "complete"),
        }
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub phase: ScanPhase,
    /// Fraction done, in `0.0..=1.0`; never decreases within a scan
    pub fraction: f64,
    /// Items collected so far
    pub items_found: usize,
}

impl ProgressEvent {
    pub fn percentage(&self) -> f64 {
        self.fraction * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.phase == ScanPhase::Completed
    }
}

/// Receives progress events from the engine.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Single-line progress on stderr.
pub struct ConsoleProgressReporter {
    last_line_length: AtomicUsize,
    start: Instant,
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleProgressReporter {
    pub fn new() -> Self {
        Self {
            last_line_length: AtomicUsize::new(0),
            start: Instant::now(),
        }
    }

    fn line(&self, event: &ProgressEvent) -> String {
        let status = if event.is_complete() { "Complete" } else { "Scanning" };
        format!(
            "\r[{}] {:.0}% | {} | Items: {} | Time: {}s",
            status,
            event.percentage(),
            event.phase,
            event.items_found,
            self.start.elapsed().as_secs()
        )
    }
}

impl ProgressSink for ConsoleProgressReporter {
    fn report(&self, event: &ProgressEvent) {
        let message = self.line(event);

        // Clear what is left of a longer previous line
        let last_len = self.last_line_length.load(Ordering::Relaxed);
        let padding = if message.len() < last_len {
            " ".repeat(last_len - message.len())
        } else {
            String::new()
        };

        eprint!("{}{}", message, padding);
        self.last_line_length.store(message.len(), Ordering::Relaxed);

        if event.is_complete() {
            eprintln!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: &ProgressEvent| seen.lock().push(event.fraction);
        sink.report(&ProgressEvent {
            phase: ScanPhase::Hashing,
            fraction: 0.5,
            items_found: 3,
        });
        assert_eq!(*seen.lock(), vec![0.5]);
    }

    #[test]
    fn test_console_line() {
        let reporter = ConsoleProgressReporter::new();
        let line = reporter.line(&ProgressEvent {
            phase: ScanPhase::Probe("cron"),
            fraction: 0.25,
            items_found: 7,
        });
        assert!(line.contains("[Scanning] 25%"));
        assert!(line.contains("cron"));
        assert!(line.contains("Items: 7"));
    }
}
