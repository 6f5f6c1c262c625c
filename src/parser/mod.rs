//! Artifact parsers.
//!
//! Each grammar turns one utility's raw output (or one configuration file)
//! into zero or more [`Artifact`] records:
//! - `schtasks /fo csv` listings
//! - `reg query` key-value blocks
//! - systemd unit files and XDG `.desktop` entries
//! - launchd property lists (as `plutil` JSON)
//! - crontabs, plain line lists, shell profiles, `authorized_keys`
//! - kernel extension listings and Android `settings`/`dumpsys` output
//! - browser extension manifests
//!
//! Parsers are pure: no I/O, and a record that does not fit its grammar is
//! skipped rather than failing the whole input.

pub mod cron;
pub mod csv;
pub mod ini;
pub mod keys;
pub mod lines;
pub mod manifest;
pub mod plist;
pub mod registry;

use crate::core::types::{Artifact, MechanismKind, Platform};
use std::path::PathBuf;

pub use registry::RegistrySection;

/// Which grammar to apply, plus the context it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grammar {
    /// `schtasks /query /fo csv /v`
    SchtasksCsv,
    /// `reg query` output for one family of registry locations
    RegQuery(RegistrySection),
    SystemdUnit,
    DesktopEntry,
    /// `plutil -convert json -o - <plist>`
    LaunchdPlist,
    /// Crontab; system crontabs carry a user column
    Crontab { system: bool },
    /// One entry per line
    LineList(MechanismKind),
    AuthorizedKeys,
    ShellProfile,
    /// `kmutil showloaded --list-only` or `kextstat`
    KextListing,
    /// System Events login item paths
    LoginItems,
    /// `settings get secure enabled_accessibility_services`
    AccessibilitySettings,
    /// `dumpsys device_policy`
    DevicePolicy,
    /// Chromium-family `manifest.json`
    ChromiumManifest { browser: String },
    /// Firefox profile `extensions.json`
    FirefoxExtensions,
}

/// Everything a parser needs besides the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHint {
    pub platform: Platform,
    /// File, registry key, or command the text came from
    pub location: String,
    pub grammar: Grammar,
}

impl SourceHint {
    pub fn new(platform: Platform, location: impl Into<String>, grammar: Grammar) -> Self {
        Self {
            platform,
            location: location.into(),
            grammar,
        }
    }

    /// Start an artifact carrying this hint's platform and location.
    pub(crate) fn artifact(&self, kind: MechanismKind, name: impl Into<String>) -> Artifact {
        Artifact::new(self.platform, kind, name, self.location.clone())
    }
}

/// Parse raw output according to `hint`.
pub fn parse(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let artifacts = match &hint.grammar {
        Grammar::SchtasksCsv => csv::parse_schtasks(raw, hint),
        Grammar::RegQuery(section) => registry::parse(raw, *section, hint),
        Grammar::SystemdUnit => ini::parse_systemd_unit(raw, hint),
        Grammar::DesktopEntry => ini::parse_desktop_entry(raw, hint),
        Grammar::LaunchdPlist => plist::parse_launchd(raw, hint),
        Grammar::Crontab { system } => cron::parse_crontab(raw, *system, hint),
        Grammar::LineList(kind) => lines::parse_line_list(raw, *kind, hint),
        Grammar::AuthorizedKeys => keys::parse_authorized_keys(raw, hint),
        Grammar::ShellProfile => lines::parse_shell_profile(raw, hint),
        Grammar::KextListing => lines::parse_kext_listing(raw, hint),
        Grammar::LoginItems => lines::parse_login_items(raw, hint),
        Grammar::AccessibilitySettings => lines::parse_accessibility_services(raw, hint),
        Grammar::DevicePolicy => lines::parse_device_policy(raw, hint),
        Grammar::ChromiumManifest { browser } => manifest::parse_chromium(raw, browser, hint),
        Grammar::FirefoxExtensions => manifest::parse_firefox(raw, hint),
    };
    log::trace!(
        "parsed {} artifact(s) from {} ({:?})",
        artifacts.len(),
        hint.location,
        hint.grammar
    );
    artifacts
}

/// Extensions that end an unquoted Windows executable path.
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    ".exe", ".dll", ".sys", ".com", ".scr", ".bat", ".cmd", ".ps1", ".vbs", ".cpl",
];

/// Drive-letter, UNC or `%VAR%\` prefixed path.
fn is_windows_path(s: &str) -> bool {
    let bytes = s.as_bytes();
    let drive = bytes.len() > 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/');
    drive || s.starts_with(r"\\") || (s.starts_with('%') && s.contains('\\'))
}

fn has_executable_extension(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    EXECUTABLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn split_at_index(cmd: &str, idx: usize) -> (Option<PathBuf>, Option<String>) {
    let args = cmd[idx..].trim();
    (
        Some(PathBuf::from(&cmd[..idx])),
        (!args.is_empty()).then(|| args.to_string()),
    )
}

/// Split a command line into executable path and arguments.
///
/// Handles a quoted executable (`"C:\Program Files\x.exe" -a`), the
/// unquoted form (`/usr/bin/x -a`), and unquoted Windows paths containing
/// spaces (`C:\Program Files\x.exe -a`), which end at the first component
/// carrying an executable extension.
pub fn split_command_line(cmd: &str) -> (Option<PathBuf>, Option<String>) {
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return (None, None);
    }

    if let Some(rest) = cmd.strip_prefix('"') {
        if let Some(end_quote) = rest.find('"') {
            let args = rest[end_quote + 1..].trim();
            return (
                Some(PathBuf::from(&rest[..end_quote])),
                (!args.is_empty()).then(|| args.to_string()),
            );
        }
    }

    if is_windows_path(cmd) {
        let boundaries = cmd
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .chain(std::iter::once(cmd.len()));
        for idx in boundaries {
            if has_executable_extension(&cmd[..idx]) {
                return split_at_index(cmd, idx);
            }
        }
    }

    match cmd.find(char::is_whitespace) {
        Some(idx) => split_at_index(cmd, idx),
        None => (Some(PathBuf::from(cmd)), None),
    }
}

/// File name component of a `/` or `\` separated path.
pub(crate) fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
