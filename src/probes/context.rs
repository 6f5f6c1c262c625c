//! Everything a probe may touch: tools, files and environment.
//!
//! Paths handed to a probe are always "logical" system paths
//! (`/etc/crontab`, `C:\Users\bob\...`). The context maps them under its
//! root prefix before touching the disk, so tests can point a probe at a
//! temporary directory laid out like a real system.

use super::ProbeError;
use crate::core::types::{Artifact, Platform};
use crate::gateway::{CommandGateway, CommandOutput};
use crate::utils::cancel::CancellationToken;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Account directories that never belong to a real user.
const SKIPPED_HOMES: &[&str] = &["Public", "Default", "Default User", "All Users", "Shared", "Guest"];

/// Result of `stat` on a definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub owner: Option<String>,
    /// Octal permission bits, e.g. "0644"
    pub permissions: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    /// Birth time, where the filesystem records one.
    pub created: Option<DateTime<Utc>>,
    /// Inode change time (unix ctime).
    pub changed: Option<DateTime<Utc>>,
}

/// Injected environment for one scan.
pub struct ProbeContext {
    pub platform: Platform,
    gateway: Arc<dyn CommandGateway>,
    timeout: Duration,
    root: PathBuf,
    home_dirs: Vec<PathBuf>,
    env: HashMap<String, String>,
    inherit_env: bool,
    cancel: CancellationToken,
}

impl ProbeContext {
    /// Context over the live system; home directories are detected.
    pub fn new(platform: Platform, gateway: Arc<dyn CommandGateway>, timeout: Duration) -> Self {
        let mut ctx = Self {
            platform,
            gateway,
            timeout,
            root: PathBuf::from("/"),
            home_dirs: Vec::new(),
            env: HashMap::new(),
            inherit_env: true,
            cancel: CancellationToken::new(),
        };
        ctx.home_dirs = ctx.detect_home_dirs();
        ctx
    }

    /// Resolve every path below `root` instead of `/`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Replace the detected home directories.
    pub fn with_home_dirs(mut self, homes: Vec<PathBuf>) -> Self {
        self.home_dirs = homes;
        self
    }

    /// Add home directories after the detected ones, skipping repeats.
    pub fn with_extra_home_dirs(mut self, extra: &[PathBuf]) -> Self {
        for home in extra {
            if !self.home_dirs.contains(home) {
                self.home_dirs.push(home.clone());
            }
        }
        self
    }

    /// Override one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Stop falling back to the process environment.
    pub fn isolated_env(mut self) -> Self {
        self.inherit_env = false;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn home_dirs(&self) -> &[PathBuf] {
        &self.home_dirs
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Environment variable, overrides first.
    pub fn env(&self, key: &str) -> Option<String> {
        if let Some(value) = self.env.get(key) {
            return Some(value.clone());
        }
        if self.inherit_env {
            std::env::var(key).ok()
        } else {
            None
        }
    }

    /// Where a logical path lives on disk.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if self.root == Path::new("/") {
            return path.to_path_buf();
        }
        let mut resolved = self.root.clone();
        let text = path.to_string_lossy();
        // Windows-style logical paths arrive as one component on Unix hosts.
        if !cfg!(windows) && text.contains('\\') {
            let rest = text.split_once(":\\").map_or(text.as_ref(), |(_, rest)| rest);
            for part in rest.split(['\\', '/']).filter(|p| !p.is_empty()) {
                resolved.push(part);
            }
            return resolved;
        }
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                other => resolved.push(other.as_os_str()),
            }
        }
        resolved
    }

    /// Run a tool, returning its output whatever the exit status.
    pub fn run(&self, argv: &[&str]) -> Result<CommandOutput, ProbeError> {
        if self.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        log::trace!("running {:?}", argv);
        self.gateway.run(argv, self.timeout).map_err(ProbeError::from)
    }

    /// Run a tool and require a zero exit status.
    pub fn run_checked(&self, argv: &[&str]) -> Result<CommandOutput, ProbeError> {
        let output = self.run(argv)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(ProbeError::NonZeroExit {
                tool: argv.first().unwrap_or(&"").to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Read a file. A missing file is `None`, not an error.
    pub fn read_to_string(&self, path: &Path) -> Result<Option<String>, ProbeError> {
        let resolved = self.resolve(path);
        match fs::read(&resolved) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProbeError::from_io(path, e)),
        }
    }

    /// Entries of a directory as logical paths, sorted. Missing is empty.
    pub fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, ProbeError> {
        let resolved = self.resolve(path);
        if !resolved.is_dir() {
            return Ok(Vec::new());
        }
        let entries = match fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProbeError::from_io(path, e)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| path.join(entry.file_name()))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Files directly inside `path` with the given extension (any if empty).
    pub fn list_files(&self, path: &Path, extension: &str) -> Result<Vec<PathBuf>, ProbeError> {
        Ok(self
            .list_dir(path)?
            .into_iter()
            .filter(|p| self.is_file(p))
            .filter(|p| {
                extension.is_empty()
                    || p.extension()
                        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
            })
            .collect())
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    pub fn is_file(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.resolve(path).is_dir()
    }

    /// Owner, permission bits and timestamps of a file.
    pub fn stat(&self, path: &Path) -> Option<FileStat> {
        let meta = fs::metadata(self.resolve(path)).ok()?;
        let mut stat = FileStat {
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            ..FileStat::default()
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            stat.permissions = Some(format!("{:04o}", meta.mode() & 0o7777));
            stat.owner = Some(self.user_name(meta.uid()));
            stat.changed = DateTime::<Utc>::from_timestamp(meta.ctime(), 0);
        }

        Some(stat)
    }

    /// Account name for `uid` from the passwd file, else the number.
    #[cfg(unix)]
    fn user_name(&self, uid: u32) -> String {
        let uid_text = uid.to_string();
        if let Ok(Some(passwd)) = self.read_to_string(Path::new("/etc/passwd")) {
            for line in passwd.lines() {
                let fields: Vec<&str> = line.split(':').collect();
                if fields.len() > 2 && fields[2] == uid_text {
                    return fields[0].to_string();
                }
            }
        }
        uid_text
    }

    /// Copy the definition file's metadata onto `artifact`.
    pub fn annotate_file(&self, artifact: &mut Artifact, definition: &Path) {
        let Some(stat) = self.stat(definition) else {
            return;
        };
        if artifact.owner.is_none() {
            artifact.owner = stat.owner;
        }
        artifact.permissions = stat.permissions;
        artifact.modified_at = stat.modified;
        artifact.created_at = stat.created;
        if let Some(changed) = stat.changed {
            artifact
                .metadata
                .insert("changed_at".to_string(), changed.to_rfc3339());
        }
    }

    /// Record whether the artifact's target exists, when that can be told.
    pub fn check_target(&self, artifact: &mut Artifact) {
        let Some(path) = artifact.raw_path() else {
            return;
        };
        let text = path.to_string_lossy();
        // Unexpanded variables and bare names are resolved by the OS loader.
        if text.contains('%') || text.contains('$') || !self.is_absolute(&text) {
            return;
        }
        let exists = self.exists(&path);
        artifact
            .metadata
            .insert("target_exists".to_string(), exists.to_string());
    }

    fn is_absolute(&self, path: &str) -> bool {
        match self.platform {
            Platform::Windows => {
                let bytes = path.as_bytes();
                bytes.len() > 2 && bytes[1] == b':' && (bytes[2] == b'\\' || bytes[2] == b'/')
            }
            _ => path.starts_with('/'),
        }
    }

    fn detect_home_dirs(&self) -> Vec<PathBuf> {
        let bases: Vec<PathBuf> = match self.platform {
            Platform::Windows => {
                let drive = self.env("SystemDrive").unwrap_or_else(|| "C:".to_string());
                vec![PathBuf::from(format!(r"{}\Users", drive))]
            }
            Platform::Macos => vec![PathBuf::from("/Users")],
            Platform::Linux => vec![PathBuf::from("/home")],
            Platform::Android | Platform::Unsupported => Vec::new(),
        };

        let mut homes = Vec::new();
        for base in bases {
            match self.list_dir(&base) {
                Ok(entries) => homes.extend(entries.into_iter().filter(|p| {
                    let name = p.file_name().map(|n| n.to_string_lossy().into_owned());
                    self.is_dir(p)
                        && name.is_some_and(|n| !n.starts_with('.') && !SKIPPED_HOMES.contains(&n.as_str()))
                })),
                Err(e) => log::debug!("cannot list {:?}: {}", base, e),
            }
        }

        if self.platform == Platform::Linux {
            homes.push(PathBuf::from("/root"));
        }
        if let Some(home) = dirs::home_dir() {
            if !homes.contains(&home) {
                homes.push(home);
            }
        }
        homes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MechanismKind;
    use crate::gateway::ScriptedGateway;
    use tempfile::TempDir;

    fn context(dir: &TempDir, platform: Platform) -> ProbeContext {
        ProbeContext::new(platform, Arc::new(ScriptedGateway::new()), Duration::from_secs(5))
            .with_root(dir.path())
            .with_home_dirs(Vec::new())
            .isolated_env()
    }

    #[test]
    fn test_resolve_unix_and_windows_paths() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Platform::Linux);
        assert_eq!(ctx.resolve(Path::new("/etc/crontab")), dir.path().join("etc").join("crontab"));

        let win = context(&dir, Platform::Windows);
        assert_eq!(
            win.resolve(Path::new(r"C:\ProgramData\Microsoft")),
            dir.path().join("ProgramData").join("Microsoft")
        );
    }

    #[test]
    fn test_missing_paths_are_empty() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Platform::Linux);
        assert_eq!(ctx.read_to_string(Path::new("/etc/rc.local")).unwrap(), None);
        assert!(ctx.list_dir(Path::new("/etc/cron.d")).unwrap().is_empty());
    }

    #[test]
    fn test_list_files_filters_extension() {
        let dir = TempDir::new().unwrap();
        let units = dir.path().join("etc/systemd/system");
        fs::create_dir_all(units.join("multi-user.target.wants")).unwrap();
        fs::write(units.join("b.service"), "").unwrap();
        fs::write(units.join("a.service"), "").unwrap();
        fs::write(units.join("x.timer"), "").unwrap();

        let ctx = context(&dir, Platform::Linux);
        let files = ctx.list_files(Path::new("/etc/systemd/system"), "service").unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/etc/systemd/system/a.service"),
                PathBuf::from("/etc/systemd/system/b.service")
            ]
        );
    }

    #[test]
    fn test_env_overrides() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Platform::Windows).with_env("APPDATA", r"C:\Users\bob\AppData\Roaming");
        assert_eq!(ctx.env("APPDATA").as_deref(), Some(r"C:\Users\bob\AppData\Roaming"));
        assert_eq!(ctx.env("PATH"), None);
    }

    #[test]
    fn test_check_target() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        fs::write(dir.path().join("usr/bin/agent"), "").unwrap();
        let ctx = context(&dir, Platform::Linux);

        let mut present = Artifact::new(Platform::Linux, MechanismKind::BootScript, "a", "/etc/rc.local")
            .with_path("/usr/bin/agent");
        ctx.check_target(&mut present);
        assert_eq!(present.meta("target_exists"), Some("true"));

        let mut missing = Artifact::new(Platform::Linux, MechanismKind::BootScript, "b", "/etc/rc.local")
            .with_path("/opt/gone");
        ctx.check_target(&mut missing);
        assert_eq!(missing.meta("target_exists"), Some("false"));

        let mut bare = Artifact::new(Platform::Linux, MechanismKind::BootScript, "c", "/etc/rc.local")
            .with_path("agent");
        ctx.check_target(&mut bare);
        assert_eq!(bare.meta("target_exists"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_stat_reports_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        let file = dir.path().join("etc/rc.local");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o757)).unwrap();

        let ctx = context(&dir, Platform::Linux);
        let stat = ctx.stat(Path::new("/etc/rc.local")).unwrap();
        assert_eq!(stat.permissions.as_deref(), Some("0757"));
        assert!(stat.modified.is_some());
    }

    #[test]
    fn test_annotate_uses_birth_time() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        let file = dir.path().join("etc/rc.local");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        let birth = fs::metadata(&file)
            .unwrap()
            .created()
            .ok()
            .map(DateTime::<Utc>::from);

        let ctx = context(&dir, Platform::Linux);
        let mut artifact = Artifact::new(Platform::Linux, MechanismKind::BootScript, "rc.local", "/etc");
        ctx.annotate_file(&mut artifact, Path::new("/etc/rc.local"));
        assert_eq!(artifact.created_at, birth);
        assert!(artifact.modified_at.is_some());
        #[cfg(unix)]
        {
            let changed = artifact.meta("changed_at").unwrap();
            assert!(DateTime::parse_from_rfc3339(changed).is_ok());
        }
    }
}
