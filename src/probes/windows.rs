//! Windows probes: Task Scheduler, registry autostart locations and
//! startup folders.

use super::{home_path, FirstError, Probe, ProbeContext, ProbeError, WINDOWS};
use crate::core::types::{Artifact, MechanismKind, Platform};
use crate::parser::registry::is_missing_key;
use crate::parser::{self, Grammar, RegistrySection, SourceHint};
use crate::signature::authenticode::ps_literal;
use std::path::{Path, PathBuf};

/// Run-style keys whose values are launched at logon.
pub const AUTORUN_PATHS: &[&str] = &[
    r"HKEY_CURRENT_USER\Software\Microsoft\Windows\CurrentVersion\Run",
    r"HKEY_CURRENT_USER\Software\Microsoft\Windows\CurrentVersion\RunOnce",
    r"HKEY_CURRENT_USER\Software\Microsoft\Windows\CurrentVersion\Policies\Explorer\Run",
    r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Run",
    r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\RunOnce",
    r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\RunServices",
    r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Policies\Explorer\Run",
    r"HKEY_LOCAL_MACHINE\Software\Wow6432Node\Microsoft\Windows\CurrentVersion\Run",
    r"HKEY_LOCAL_MACHINE\Software\Wow6432Node\Microsoft\Windows\CurrentVersion\RunOnce",
];

pub const SERVICES_PATH: &str = r"HKEY_LOCAL_MACHINE\SYSTEM\CurrentControlSet\Services";

pub const SESSION_MANAGER_PATH: &str =
    r"HKEY_LOCAL_MACHINE\SYSTEM\CurrentControlSet\Control\Session Manager";

pub const LSA_PATHS: &[&str] = &[
    r"HKEY_LOCAL_MACHINE\SYSTEM\CurrentControlSet\Control\Lsa",
    r"HKEY_LOCAL_MACHINE\SYSTEM\CurrentControlSet\Control\Lsa\OSConfig",
];

pub const WINLOGON_PATH: &str =
    r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows NT\CurrentVersion\Winlogon";

pub const IFEO_PATH: &str =
    r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows NT\CurrentVersion\Image File Execution Options";

pub const APPINIT_PATHS: &[&str] = &[
    r"HKEY_LOCAL_MACHINE\Software\Microsoft\Windows NT\CurrentVersion\Windows",
    r"HKEY_LOCAL_MACHINE\Software\Wow6432Node\Microsoft\Windows NT\CurrentVersion\Windows",
];

const STARTUP_SUBPATH: &[&str] = &["Microsoft", "Windows", "Start Menu", "Programs", "Startup"];
const COMMON_STARTUP_SUBPATH: &[&str] = &["Microsoft", "Windows", "Start Menu", "Programs", "StartUp"];

pub(super) fn probes() -> Vec<Box<dyn Probe>> {
    vec![
        Box::new(ScheduledTasksProbe),
        Box::new(RegistryProbe::run_keys()),
        Box::new(RegistryProbe::services()),
        Box::new(RegistryProbe::boot_execute()),
        Box::new(RegistryProbe::lsa_packages()),
        Box::new(RegistryProbe::winlogon()),
        Box::new(RegistryProbe::image_hijack()),
        Box::new(RegistryProbe::appinit_dlls()),
        Box::new(StartupFoldersProbe),
    ]
}

/// Task Scheduler, through `schtasks /query /fo csv /v`.
pub struct ScheduledTasksProbe;

impl Probe for ScheduledTasksProbe {
    fn name(&self) -> &'static str {
        "scheduled_tasks"
    }

    fn platforms(&self) -> &'static [Platform] {
        WINDOWS
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let output = ctx.run_checked(&["schtasks", "/query", "/fo", "csv", "/v"])?;
        let hint = SourceHint::new(ctx.platform, "Task Scheduler", Grammar::SchtasksCsv);
        for mut artifact in parser::parse(&output.stdout, &hint) {
            ctx.check_target(&mut artifact);
            out.push(artifact);
        }
        Ok(())
    }
}

/// One family of registry locations read with `reg query`.
pub struct RegistryProbe {
    name: &'static str,
    section: RegistrySection,
    /// Arguments after `reg query`, one query per entry
    queries: Vec<Vec<&'static str>>,
}

impl RegistryProbe {
    pub fn run_keys() -> Self {
        Self {
            name: "registry_run_keys",
            section: RegistrySection::RunKeys,
            queries: AUTORUN_PATHS.iter().map(|k| vec![*k]).collect(),
        }
    }

    pub fn services() -> Self {
        Self {
            name: "services",
            section: RegistrySection::Services,
            queries: vec![vec![SERVICES_PATH, "/s", "/v", "ImagePath"]],
        }
    }

    pub fn boot_execute() -> Self {
        Self {
            name: "boot_execute",
            section: RegistrySection::BootExecute,
            queries: vec![vec![SESSION_MANAGER_PATH, "/v", "BootExecute"]],
        }
    }

    pub fn lsa_packages() -> Self {
        Self {
            name: "lsa_packages",
            section: RegistrySection::LsaPackages,
            queries: LSA_PATHS.iter().map(|k| vec![*k]).collect(),
        }
    }

    pub fn winlogon() -> Self {
        Self {
            name: "winlogon",
            section: RegistrySection::Winlogon,
            queries: vec![vec![WINLOGON_PATH]],
        }
    }

    pub fn image_hijack() -> Self {
        Self {
            name: "image_hijack",
            section: RegistrySection::ImageHijack,
            queries: vec![vec![IFEO_PATH, "/s", "/v", "Debugger"]],
        }
    }

    pub fn appinit_dlls() -> Self {
        Self {
            name: "appinit_dlls",
            section: RegistrySection::AppInitDlls,
            queries: APPINIT_PATHS.iter().map(|k| vec![*k]).collect(),
        }
    }

    /// Raw output for one query; a key that does not exist is empty.
    fn query(&self, ctx: &ProbeContext, args: &[&str]) -> Result<String, ProbeError> {
        let mut argv = vec!["reg", "query"];
        argv.extend_from_slice(args);
        let output = ctx.run(&argv)?;
        if output.is_success() {
            return Ok(output.stdout);
        }
        if is_missing_key(&output.stderr) || is_missing_key(&output.stdout) {
            log::debug!("{} not present", args[0]);
            return Ok(String::new());
        }
        Err(ProbeError::NonZeroExit {
            tool: "reg".to_string(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

impl Probe for RegistryProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn platforms(&self) -> &'static [Platform] {
        WINDOWS
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut errors = FirstError::default();
        for args in &self.queries {
            let Some(raw) = errors.note(self.query(ctx, args))? else {
                continue;
            };
            let hint = SourceHint::new(ctx.platform, args[0], Grammar::RegQuery(self.section));
            for mut artifact in parser::parse(&raw, &hint) {
                ctx.check_target(&mut artifact);
                out.push(artifact);
            }
        }
        errors.finish()
    }
}

/// Per-user and all-users Startup folders.
pub struct StartupFoldersProbe;

impl StartupFoldersProbe {
    fn folders(ctx: &ProbeContext) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = ctx
            .home_dirs()
            .iter()
            .map(|home| {
                let mut parts = vec!["AppData", "Roaming"];
                parts.extend_from_slice(STARTUP_SUBPATH);
                home_path(home, &parts)
            })
            .collect();

        if let Some(appdata) = ctx.env("APPDATA") {
            let folder = home_path(Path::new(&appdata), STARTUP_SUBPATH);
            if !folders.contains(&folder) {
                folders.push(folder);
            }
        }

        let program_data = ctx
            .env("ProgramData")
            .unwrap_or_else(|| r"C:\ProgramData".to_string());
        folders.push(home_path(Path::new(&program_data), COMMON_STARTUP_SUBPATH));
        folders
    }

    /// Target and arguments of a `.lnk` file via the WScript.Shell COM object.
    fn resolve_shortcut(ctx: &ProbeContext, lnk: &Path) -> Option<(String, String)> {
        let script = format!(
            "$s = (New-Object -ComObject WScript.Shell).CreateShortcut({}); \
             @{{Target=$s.TargetPath; Arguments=$s.Arguments}} | ConvertTo-Json -Compress",
            ps_literal(&ctx.resolve(lnk))
        );
        let argv = ["powershell", "-NoProfile", "-NonInteractive", "-Command", script.as_str()];
        let output = match ctx.run(&argv) {
            Ok(out) if out.is_success() => out,
            Ok(out) => {
                log::debug!("cannot read shortcut {:?}: {}", lnk, out.stderr.trim());
                return None;
            }
            Err(e) => {
                log::debug!("cannot read shortcut {:?}: {}", lnk, e);
                return None;
            }
        };
        let value: serde_json::Value = serde_json::from_str(output.stdout.trim()).ok()?;
        let target = value.get("Target")?.as_str()?.trim().to_string();
        let arguments = value
            .get("Arguments")
            .and_then(|a| a.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        (!target.is_empty()).then_some((target, arguments))
    }

    fn entry(ctx: &ProbeContext, folder: &Path, file: &Path) -> Artifact {
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = file
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let mut artifact = Artifact::new(
            ctx.platform,
            MechanismKind::StartupItem,
            name,
            folder.to_string_lossy(),
        )
        .with_meta("file", file.to_string_lossy())
        .with_meta("file_type", extension.as_str());

        let shortcut = if extension == "lnk" {
            Self::resolve_shortcut(ctx, file)
        } else {
            None
        };
        match shortcut {
            Some((target, arguments)) => {
                let command = if arguments.is_empty() {
                    format!("\"{}\"", target)
                } else {
                    format!("\"{}\" {}", target, arguments)
                };
                artifact = artifact.with_path(target).with_command(command);
            }
            None => artifact = artifact.with_path(file),
        }

        ctx.annotate_file(&mut artifact, file);
        ctx.check_target(&mut artifact);
        artifact
    }
}

impl Probe for StartupFoldersProbe {
    fn name(&self) -> &'static str {
        "startup_folders"
    }

    fn platforms(&self) -> &'static [Platform] {
        WINDOWS
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut errors = FirstError::default();
        for folder in Self::folders(ctx) {
            let Some(files) = errors.note(ctx.list_files(&folder, ""))? else {
                continue;
            };
            for file in files {
                let file_name = file.file_name().map(|n| n.to_string_lossy().to_lowercase());
                if file_name.as_deref() == Some("desktop.ini") {
                    continue;
                }
                out.push(Self::entry(ctx, &folder, &file));
            }
        }
        errors.finish()
    }
}
