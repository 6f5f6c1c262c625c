//! INI-style files: systemd units and XDG `.desktop` entries.

use super::{base_name, split_command_line, SourceHint};
use crate::core::types::{Artifact, MechanismKind};

/// Parsed sections in file order. Repeated keys are all kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl IniDocument {
    pub fn parse(raw: &str) -> Self {
        let mut doc = IniDocument::default();
        let mut pending = String::new();

        for line in raw.lines() {
            let line = line.trim_end_matches('\r');
            // systemd allows `\` continuations
            if let Some(stripped) = line.strip_suffix('\\') {
                pending.push_str(stripped);
                pending.push(' ');
                continue;
            }
            let full = if pending.is_empty() {
                line.trim().to_string()
            } else {
                let joined = format!("{}{}", pending, line.trim());
                pending.clear();
                joined
            };

            if full.is_empty() || full.starts_with('#') || full.starts_with(';') {
                continue;
            }
            if full.starts_with('[') && full.ends_with(']') {
                doc.sections
                    .push((full[1..full.len() - 1].trim().to_string(), Vec::new()));
                continue;
            }
            let Some((key, value)) = full.split_once('=') else {
                continue;
            };
            if let Some((_, entries)) = doc.sections.last_mut() {
                entries.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        doc
    }

    /// Every value of `key` in `section`, in order.
    pub fn all<'a>(&'a self, section: &str, key: &str) -> Vec<&'a str> {
        self.sections
            .iter()
            .filter(|(name, _)| name == section)
            .flat_map(|(_, entries)| entries.iter())
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Final value of `key` in `section` (later assignments win).
    pub fn get<'a>(&'a self, section: &str, key: &str) -> Option<&'a str> {
        self.all(section, key).last().copied()
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.iter().any(|(name, _)| name == section)
    }
}

/// Strip systemd executable prefixes (`-`, `@`, `+`, `!`, `:`).
fn strip_exec_prefixes(exec: &str) -> &str {
    exec.trim_start_matches(['-', '@', '+', '!', ':'])
}

/// ExecStart lines, honouring an empty assignment resetting the list.
fn exec_starts(doc: &IniDocument) -> Vec<&str> {
    let mut commands = Vec::new();
    for value in doc.all("Service", "ExecStart") {
        if value.is_empty() {
            commands.clear();
        } else {
            commands.push(value);
        }
    }
    commands
}

/// One artifact per unit file, describing its first ExecStart.
pub fn parse_systemd_unit(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let doc = IniDocument::parse(raw);
    let execs = exec_starts(&doc);
    let Some(first) = execs.first() else {
        return Vec::new();
    };

    let command = strip_exec_prefixes(first);
    let mut artifact = hint.artifact(MechanismKind::AutostartUnit, base_name(&hint.location));
    artifact = artifact.with_command(command);
    if let (Some(path), _) = split_command_line(command) {
        artifact = artifact.with_path(path);
    }
    if execs.len() > 1 {
        artifact = artifact.with_meta("exec_start_count", execs.len().to_string());
    }

    for (key, meta) in [
        ("ExecStartPre", "exec_start_pre"),
        ("ExecStartPost", "exec_start_post"),
    ] {
        let values = doc.all("Service", key);
        if !values.is_empty() {
            artifact = artifact.with_meta(meta, values.join(" ; "));
        }
    }
    if let Some(desc) = doc.get("Unit", "Description") {
        artifact = artifact.with_meta("description", desc);
    }
    if let Some(wanted) = doc.get("Install", "WantedBy") {
        artifact = artifact.with_meta("wanted_by", wanted);
    }
    if let Some(kind) = doc.get("Service", "Type") {
        artifact = artifact.with_meta("service_type", kind);
    }
    if let Some(user) = doc.get("Service", "User") {
        artifact.owner = Some(user.to_string());
    }

    vec![artifact]
}

/// Remove `%f`-style field codes from a desktop Exec line.
fn strip_field_codes(exec: &str) -> String {
    exec.split_whitespace()
        .filter(|tok| !(tok.len() == 2 && tok.starts_with('%')))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One artifact per autostart `.desktop` entry.
pub fn parse_desktop_entry(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    const SECTION: &str = "Desktop Entry";
    let doc = IniDocument::parse(raw);
    if !doc.has_section(SECTION) {
        return Vec::new();
    }
    let Some(exec) = doc.get(SECTION, "Exec").filter(|e| !e.is_empty()) else {
        return Vec::new();
    };

    let file_name = base_name(&hint.location);
    let name = doc
        .get(SECTION, "Name")
        .unwrap_or_else(|| file_name.trim_end_matches(".desktop"));
    let command = strip_field_codes(exec);

    // Hidden entries are how a user turns a system-wide autostart off.
    if doc.get(SECTION, "Hidden") == Some("true")
        || doc.get(SECTION, "X-GNOME-Autostart-enabled") == Some("false")
    {
        log::debug!("{} is disabled", hint.location);
        return Vec::new();
    }

    let mut artifact = hint
        .artifact(MechanismKind::StartupItem, name)
        .with_command(command.as_str())
        .with_meta("desktop_file", file_name);
    if let (Some(path), _) = split_command_line(&command) {
        artifact = artifact.with_path(path);
    }
    if let Some(only) = doc.get(SECTION, "OnlyShowIn") {
        artifact = artifact.with_meta("only_show_in", only);
    }

    vec![artifact]
}
