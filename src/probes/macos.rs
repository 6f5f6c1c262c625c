//! macOS probes: launchd jobs, login items, kernel extensions.

use super::{home_path, FirstError, Probe, ProbeContext, ProbeError, MACOS};
use crate::core::types::{Artifact, Platform};
use crate::parser::{self, Grammar, SourceHint};
use std::path::{Path, PathBuf};

/// System-wide launchd job directories.
pub const LAUNCHD_DIRS: &[&str] = &[
    "/Library/LaunchAgents",
    "/Library/LaunchDaemons",
    "/System/Library/LaunchAgents",
    "/System/Library/LaunchDaemons",
];

const LOGIN_ITEMS_SCRIPT: &str =
    "tell application \"System Events\" to get the path of every login item";

pub(super) fn probes() -> Vec<Box<dyn Probe>> {
    vec![
        Box::new(LaunchdProbe),
        Box::new(LoginItemsProbe),
        Box::new(KernelExtensionsProbe),
    ]
}

/// Launch agents and daemons, converted to JSON with `plutil`.
pub struct LaunchdProbe;

impl LaunchdProbe {
    fn directories(ctx: &ProbeContext) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = LAUNCHD_DIRS.iter().map(PathBuf::from).collect();
        dirs.extend(
            ctx.home_dirs()
                .iter()
                .map(|home| home_path(home, &["Library", "LaunchAgents"])),
        );
        dirs
    }

    fn scan_plist(ctx: &ProbeContext, plist: &Path, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let resolved = ctx.resolve(plist).to_string_lossy().into_owned();
        let output = ctx.run(&["plutil", "-convert", "json", "-o", "-", resolved.as_str()])?;
        if !output.is_success() {
            // A malformed plist is one bad record, not a failed probe.
            log::debug!("plutil could not read {:?}: {}", plist, output.stderr.trim());
            return Ok(());
        }

        let hint = SourceHint::new(ctx.platform, plist.to_string_lossy(), Grammar::LaunchdPlist);
        for mut artifact in parser::parse(&output.stdout, &hint) {
            ctx.annotate_file(&mut artifact, plist);
            ctx.check_target(&mut artifact);
            out.push(artifact);
        }
        Ok(())
    }
}

impl Probe for LaunchdProbe {
    fn name(&self) -> &'static str {
        "launchd"
    }

    fn platforms(&self) -> &'static [Platform] {
        MACOS
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut errors = FirstError::default();
        for dir in Self::directories(ctx) {
            let Some(plists) = errors.note(ctx.list_files(&dir, "plist"))? else {
                continue;
            };
            for plist in plists {
                match Self::scan_plist(ctx, &plist, out) {
                    // Without plutil nothing else in this probe can work.
                    Err(e @ ProbeError::ToolMissing(_)) => return Err(e),
                    other => {
                        errors.note(other)?;
                    }
                }
            }
        }
        errors.finish()
    }
}

/// Login items reported by System Events.
pub struct LoginItemsProbe;

impl Probe for LoginItemsProbe {
    fn name(&self) -> &'static str {
        "login_items"
    }

    fn platforms(&self) -> &'static [Platform] {
        MACOS
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let output = ctx.run_checked(&["osascript", "-e", LOGIN_ITEMS_SCRIPT])?;
        let hint = SourceHint::new(ctx.platform, "System Events login items", Grammar::LoginItems);
        for mut artifact in parser::parse(&output.stdout, &hint) {
            ctx.check_target(&mut artifact);
            out.push(artifact);
        }
        Ok(())
    }
}

/// Loaded kernel extensions, from `kmutil` or the older `kextstat`.
pub struct KernelExtensionsProbe;

impl Probe for KernelExtensionsProbe {
    fn name(&self) -> &'static str {
        "kernel_extensions"
    }

    fn platforms(&self) -> &'static [Platform] {
        MACOS
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let (location, output) = match ctx.run_checked(&["kmutil", "showloaded", "--list-only"]) {
            Ok(output) => ("kmutil showloaded", output),
            Err(ProbeError::ToolMissing(_)) => ("kextstat", ctx.run_checked(&["kextstat"])?),
            Err(e) => return Err(e),
        };
        let hint = SourceHint::new(ctx.platform, location, Grammar::KextListing);
        out.extend(parser::parse(&output.stdout, &hint));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MechanismKind;
    use crate::gateway::{CommandOutput, ScriptedGateway};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context(gw: Arc<ScriptedGateway>, root: &Path) -> ProbeContext {
        ProbeContext::new(Platform::Macos, gw, Duration::from_secs(5))
            .with_root(root)
            .with_home_dirs(vec![PathBuf::from("/Users/alice")])
            .isolated_env()
    }

    #[test]
    fn test_launchd_agents_parsed() {
        let dir = TempDir::new().unwrap();
        let agents = dir.path().join("Users/alice/Library/LaunchAgents");
        fs::create_dir_all(&agents).unwrap();
        let plist = agents.join("com.acme.sync.plist");
        fs::write(&plist, "<plist/>").unwrap();
        fs::write(agents.join("broken.plist"), "garbage").unwrap();

        let json = r#"{"Label":"com.acme.sync","ProgramArguments":["/Applications/Acme.app/Contents/MacOS/sync","--bg"],"RunAtLoad":true}"#;
        let good = plist.to_string_lossy().into_owned();
        let broken = agents.join("broken.plist").to_string_lossy().into_owned();
        let gw = Arc::new(
            ScriptedGateway::new()
                .on(&["plutil", "-convert", "json", "-o", "-", good.as_str()], json)
                .on_output(
                    &["plutil", "-convert", "json", "-o", "-", broken.as_str()],
                    CommandOutput::failure(1, "Property List error"),
                ),
        );

        let ctx = context(gw, dir.path());
        let mut out = Vec::new();
        LaunchdProbe.scan(&ctx, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "com.acme.sync");
        assert_eq!(out[0].location, "/Users/alice/Library/LaunchAgents/com.acme.sync.plist");
        assert_eq!(out[0].meta("target_exists"), Some("false"));
    }

    #[test]
    fn test_launchd_without_plutil_fails() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Library/LaunchDaemons")).unwrap();
        fs::write(dir.path().join("Library/LaunchDaemons/x.plist"), "").unwrap();
        let gw = Arc::new(ScriptedGateway::new());
        let ctx = context(gw.clone(), dir.path());
        let mut out = Vec::new();
        assert_eq!(
            LaunchdProbe.scan(&ctx, &mut out),
            Err(ProbeError::ToolMissing("plutil".into()))
        );
    }

    #[test]
    fn test_no_plists_is_empty() {
        let dir = TempDir::new().unwrap();
        let gw = Arc::new(ScriptedGateway::new());
        let ctx = context(gw.clone(), dir.path());
        let mut out = Vec::new();
        LaunchdProbe.scan(&ctx, &mut out).unwrap();
        assert!(out.is_empty());
        assert!(gw.calls().is_empty());
    }

    #[test]
    fn test_kext_falls_back_to_kextstat() {
        let dir = TempDir::new().unwrap();
        let listing = "Index Refs Address            Size       Wired      Name (Version) UUID <Linked Against>\n  187    0 0xffffff7f8a1b2000 0x5000     0x5000     com.acme.driver (1.0.2) 1234ABCD <5 4 3>\n";
        let gw = Arc::new(ScriptedGateway::new().on(&["kextstat"], listing));
        let ctx = context(gw, dir.path());
        let mut out = Vec::new();
        KernelExtensionsProbe.scan(&ctx, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mechanism_kind, MechanismKind::KernelModule);
        assert_eq!(out[0].meta("bundle_id"), Some("com.acme.driver"));
        assert_eq!(out[0].location, "kextstat");
    }

    #[test]
    fn test_login_items() {
        let dir = TempDir::new().unwrap();
        let gw = Arc::new(ScriptedGateway::new().on(
            &["osascript", "-e", LOGIN_ITEMS_SCRIPT],
            "/Applications/Acme.app, /Users/alice/Downloads/Helper.app\n",
        ));
        let ctx = context(gw, dir.path());
        let mut out = Vec::new();
        LoginItemsProbe.scan(&ctx, &mut out).unwrap();
        let names: Vec<&str> = out.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Helper"]);
    }
}
