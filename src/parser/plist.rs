//! launchd property lists, read as the JSON `plutil -convert json` emits.

use super::{base_name, SourceHint};
use crate::core::types::{Artifact, MechanismKind};
use serde_json::Value;

/// Quote an argument containing whitespace so the joined command stays splittable.
fn quote_arg(arg: &str) -> String {
    if arg.chars().any(char::is_whitespace) {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

fn bool_field(doc: &Value, key: &str) -> Option<bool> {
    match doc.get(key)? {
        Value::Bool(b) => Some(*b),
        // KeepAlive may be a dictionary of conditions
        Value::Object(_) => Some(true),
        _ => None,
    }
}

/// One artifact for the job, plus one per `DYLD_INSERT_LIBRARIES` entry.
pub fn parse_launchd(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let doc: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("{} is not a readable plist: {}", hint.location, e);
            return Vec::new();
        }
    };
    if !doc.is_object() {
        return Vec::new();
    }

    let file_name = base_name(&hint.location);
    let label = doc
        .get("Label")
        .and_then(Value::as_str)
        .unwrap_or_else(|| file_name.trim_end_matches(".plist"));

    let arguments: Vec<&str> = doc
        .get("ProgramArguments")
        .and_then(Value::as_array)
        .map(|args| args.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let program = doc
        .get("Program")
        .and_then(Value::as_str)
        .or_else(|| arguments.first().copied());

    let mut artifact = hint.artifact(MechanismKind::AutostartPlist, label);
    if let Some(program) = program {
        artifact = artifact.with_path(program);
    }
    let command = if arguments.is_empty() {
        program.map(quote_arg)
    } else {
        Some(
            arguments
                .iter()
                .map(|a| quote_arg(a))
                .collect::<Vec<_>>()
                .join(" "),
        )
    };
    if let Some(command) = command {
        artifact = artifact.with_command(command);
    }

    if let Some(disabled) = bool_field(&doc, "Disabled") {
        artifact = artifact.with_meta("enabled", (!disabled).to_string());
    }
    if let Some(run_at_load) = bool_field(&doc, "RunAtLoad") {
        artifact = artifact.with_meta("run_at_load", run_at_load.to_string());
    }
    if let Some(keep_alive) = bool_field(&doc, "KeepAlive") {
        artifact = artifact.with_meta("keep_alive", keep_alive.to_string());
    }
    if let Some(interval) = doc.get("StartInterval").and_then(Value::as_u64) {
        artifact = artifact.with_meta("start_interval", interval.to_string());
    }
    if let Some(user) = doc.get("UserName").and_then(Value::as_str) {
        artifact.owner = Some(user.to_string());
    }

    let mut artifacts = Vec::new();
    if let Some(libs) = doc
        .pointer("/EnvironmentVariables/DYLD_INSERT_LIBRARIES")
        .and_then(Value::as_str)
    {
        for lib in libs.split(':').map(str::trim).filter(|s| !s.is_empty()) {
            artifacts.push(
                hint.artifact(MechanismKind::PreloadLibrary, base_name(lib))
                    .with_path(lib)
                    .with_meta("variable", "DYLD_INSERT_LIBRARIES")
                    .with_meta("job", label),
            );
        }
    }

    // A job with nothing to run is still reported, it may be a leftover.
    artifacts.insert(0, artifact);
    artifacts
}
