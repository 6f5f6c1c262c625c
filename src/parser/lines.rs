//! Line-oriented grammars: plain lists, shell profiles, kext listings,
//! login items and Android settings/dumpsys output.

use super::{base_name, SourceHint};
use crate::core::types::{Artifact, MechanismKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static BUNDLE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)+$").unwrap());

static COMPONENT_INFO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ComponentInfo\{([^/}\s]+)/([^}\s]+)\}").unwrap());

static ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(export\s+|local\s+|readonly\s+)?[A-Za-z_][A-Za-z0-9_]*=").unwrap());

/// One entry per non-comment line; entries may also be separated by
/// whitespace or `:` (as in `/etc/ld.so.preload`).
pub fn parse_line_list(raw: &str, kind: MechanismKind, hint: &SourceHint) -> Vec<Artifact> {
    let mut artifacts = Vec::new();

    for line in raw.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        for entry in line
            .split(|c: char| c.is_whitespace() || c == ':')
            .filter(|s| !s.is_empty())
        {
            let mut artifact = hint.artifact(kind, base_name(entry)).with_meta("entry", entry);
            if entry.starts_with('/') {
                artifact = artifact.with_path(entry);
            }
            artifacts.push(artifact);
        }
    }

    artifacts
}

/// First words of lines that only shape the shell itself.
const SHELL_BUILTINS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "case", "esac", "for", "while", "until", "do", "done",
    "function", "{", "}", ";;", "return", "shopt", "set", "unset", "alias", "unalias", "umask",
    "bind", "complete", "setopt", "unsetopt", "autoload", "zstyle", "compinit", "bindkey",
    "ulimit", "typeset", "declare", "local", "export", "readonly", "true", "false", "exit",
];

fn has_substitution(line: &str) -> bool {
    line.contains("$(") || line.contains('`')
}

/// Whether a shell profile line launches anything worth reporting.
fn is_executing_line(line: &str) -> bool {
    let first = line.split_whitespace().next().unwrap_or("");

    // case arms such as `xterm-color|*-256color)`
    if first.ends_with(')') && !first.contains('(') {
        return false;
    }
    if first.ends_with("()") || line.contains("() {") {
        return false;
    }
    if ASSIGNMENT.is_match(line) {
        return has_substitution(line);
    }
    if SHELL_BUILTINS.contains(&first) {
        // `export FOO=$(...)` was handled above; bare builtins never execute
        return false;
    }
    true
}

/// Report executing lines of a shell startup file, one artifact per line.
///
/// Comments, plain assignments, aliases and control keywords are skipped.
/// Continuation lines are joined first.
pub fn parse_shell_profile(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    let mut pending = String::new();
    let mut pending_start = 0;
    let file = base_name(&hint.location).to_string();

    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if let Some(stripped) = line.strip_suffix('\\') {
            if pending.is_empty() {
                pending_start = idx;
            }
            pending.push_str(stripped.trim());
            pending.push(' ');
            continue;
        }
        let (lineno, full) = if pending.is_empty() {
            (idx, line.trim().to_string())
        } else {
            let joined = format!("{}{}", pending, line.trim());
            pending.clear();
            (pending_start, joined)
        };

        if full.is_empty() || full.starts_with('#') || !is_executing_line(&full) {
            continue;
        }

        let mut artifact = hint
            .artifact(MechanismKind::ShellProfile, format!("{}:{}", file, lineno + 1))
            .with_command(full.as_str())
            .with_meta("line", (lineno + 1).to_string());
        // `source file` / `. file` pull in another script
        let mut words = full.split_whitespace();
        if let (Some("source" | "."), Some(target)) = (words.next(), words.next()) {
            artifact = artifact.with_meta("sources", target);
        }
        artifacts.push(artifact);
    }

    artifacts
}

/// Loaded kernel extensions from `kmutil showloaded --list-only` or `kextstat`.
pub fn parse_kext_listing(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let mut artifacts = Vec::new();

    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            continue;
        };
        if !first.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Some(pos) = tokens
            .iter()
            .position(|t| BUNDLE_ID.is_match(t) && !t.starts_with("0x"))
        else {
            continue;
        };
        let bundle = tokens[pos];
        let mut artifact = hint
            .artifact(MechanismKind::KernelModule, bundle)
            .with_meta("bundle_id", bundle);
        if let Some(version) = tokens
            .get(pos + 1)
            .filter(|t| t.starts_with('(') && t.ends_with(')'))
        {
            artifact = artifact.with_meta("version", version.trim_matches(['(', ')']));
        }
        artifacts.push(artifact);
    }

    artifacts
}

/// Login items from `osascript ... get the path of every login item`,
/// printed as a comma-separated list of application paths.
pub fn parse_login_items(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    raw.trim()
        .split(", ")
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "missing value")
        .map(|path| {
            let name = base_name(path.trim_end_matches('/')).trim_end_matches(".app");
            hint.artifact(MechanismKind::StartupItem, name).with_path(path)
        })
        .collect()
}

/// `settings get secure enabled_accessibility_services`: colon-separated
/// `package/class` components, or `null`.
pub fn parse_accessibility_services(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    raw.split(':')
        .map(str::trim)
        .filter(|c| !c.is_empty() && seen.insert(c.to_string()))
        .filter_map(|component| {
            let (package, class) = component.split_once('/')?;
            Some(
                hint.artifact(MechanismKind::AccessibilityService, package)
                    .with_meta("package", package)
                    .with_meta("component", component)
                    .with_meta("class", class),
            )
        })
        .collect()
}

/// Active device administrators from `dumpsys device_policy`.
pub fn parse_device_policy(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let mut seen = HashSet::new();
    let mut artifacts = Vec::new();

    for caps in COMPONENT_INFO.captures_iter(raw) {
        let (Some(package), Some(class)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let component = format!("{}/{}", package.as_str(), class.as_str());
        if !seen.insert(component.clone()) {
            continue;
        }
        artifacts.push(
            hint.artifact(MechanismKind::DeviceAdmin, package.as_str())
                .with_meta("package", package.as_str())
                .with_meta("component", component)
                .with_meta("class", class.as_str()),
        );
    }

    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Platform;
    use crate::parser::Grammar;
    use std::path::PathBuf;

    fn hint(platform: Platform, location: &str, grammar: Grammar) -> SourceHint {
        SourceHint::new(platform, location, grammar)
    }

    #[test]
    fn test_line_list_separators() {
        let h = hint(
            Platform::Linux,
            "/etc/ld.so.preload",
            Grammar::LineList(MechanismKind::PreloadLibrary),
        );
        let artifacts = parse_line_list(
            "# preload\n/usr/lib/a.so /usr/lib/b.so\n/opt/c.so:/opt/d.so\n",
            MechanismKind::PreloadLibrary,
            &h,
        );
        assert_eq!(artifacts.len(), 4);
        assert_eq!(artifacts[3].path, Some(PathBuf::from("/opt/d.so")));
        assert_eq!(artifacts[0].name, "a.so");
    }

    #[test]
    fn test_modules_load_names() {
        let h = hint(
            Platform::Linux,
            "/etc/modules-load.d/x.conf",
            Grammar::LineList(MechanismKind::KernelModule),
        );
        let artifacts = parse_line_list(
            "nf_conntrack\n; legacy comment\n",
            MechanismKind::KernelModule,
            &h,
        );
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "nf_conntrack");
        assert!(artifacts[0].path.is_none());
    }

    #[test]
    fn test_shell_profile_filtering() {
        let raw = r#"# ~/.bashrc
export PATH="$HOME/bin:$PATH"
HISTSIZE=1000
alias ll='ls -alF'
if [ -f ~/.bash_aliases ]; then
    . ~/.bash_aliases
fi
case "$TERM" in
    xterm-color|*-256color) color_prompt=yes;;
esac
eval "$(dircolors -b)"
export TOKEN=$(cat /tmp/.t)
/tmp/.hidden/agent &
"#;
        let h = hint(Platform::Linux, "/home/u/.bashrc", Grammar::ShellProfile);
        let artifacts = parse_shell_profile(raw, &h);
        let commands: Vec<_> = artifacts
            .iter()
            .map(|a| a.command.as_deref().unwrap_or(""))
            .collect();
        assert_eq!(
            commands,
            vec![
                ". ~/.bash_aliases",
                "eval \"$(dircolors -b)\"",
                "export TOKEN=$(cat /tmp/.t)",
                "/tmp/.hidden/agent &",
            ]
        );
        assert_eq!(artifacts[0].meta("sources"), Some("~/.bash_aliases"));
        assert_eq!(artifacts[3].name, ".bashrc:13");
    }

    #[test]
    fn test_kext_listing() {
        let raw = "Index Refs Address            Size       Wired      Name (Version) UUID <Linked Against>\n    1  157 0xffffff8000c00000 0x1234 0x1234 com.apple.kec.corecrypto (12.0) 1234-ABCD <7 6 5 4 3 1>\n  180    0 0xffffff7f8a000000 0x5000 0x5000 com.acme.driver.Filter (2.1.0) 9999-FFFF <5 4 3>\n";
        let h = hint(Platform::Macos, "kmutil showloaded", Grammar::KextListing);
        let artifacts = parse_kext_listing(raw, &h);
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[1].name, "com.acme.driver.Filter");
        assert_eq!(artifacts[1].meta("version"), Some("2.1.0"));
    }

    #[test]
    fn test_login_items() {
        let h = hint(Platform::Macos, "login items", Grammar::LoginItems);
        let artifacts = parse_login_items("/Applications/Slack.app, /Users/u/Apps/Tool.app\n", &h);
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].name, "Slack");
        assert!(parse_login_items("\n", &h).is_empty());
    }

    #[test]
    fn test_accessibility_services() {
        let h = hint(
            Platform::Android,
            "settings secure",
            Grammar::AccessibilitySettings,
        );
        let artifacts = parse_accessibility_services(
            "com.a.reader/com.a.reader.Svc:com.b/.Helper:com.a.reader/com.a.reader.Svc\n",
            &h,
        );
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[1].name, "com.b");
        assert!(parse_accessibility_services("null\n", &h).is_empty());
    }

    #[test]
    fn test_device_policy() {
        let raw = "Enabled Device Admins (User 0, provisioningState: 0):\n  com.corp.mdm/.AdminReceiver:\n    admin=ComponentInfo{com.corp.mdm/com.corp.mdm.AdminReceiver}\n  mActiveAdmin ComponentInfo{com.corp.mdm/com.corp.mdm.AdminReceiver}\n";
        let h = hint(Platform::Android, "dumpsys device_policy", Grammar::DevicePolicy);
        let artifacts = parse_device_policy(raw, &h);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "com.corp.mdm");
    }
}
