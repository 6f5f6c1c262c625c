//! Persistence probes.
//!
//! One probe per persistence-mechanism category. Each probe owns its
//! well-known locations, reads them through a [`ProbeContext`] and pushes raw
//! artifacts; risk is assigned later by the engine. A probe failing never
//! takes other probes down with it.

pub mod android;
pub mod browser;
pub mod context;
pub mod linux;
pub mod macos;
pub mod unix;
pub mod windows;

pub use context::{FileStat, ProbeContext};

use crate::core::config::Config;
use crate::core::types::{Artifact, Platform, ScanError, ScanErrorKind};
use crate::gateway::GatewayError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a probe stopped early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("required tool not found: {0}")]
    ToolMissing(String),

    #[error("{tool} exited with status {code}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

impl ProbeError {
    pub(crate) fn from_io(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::PermissionDenied(path.display().to_string())
        } else {
            ProbeError::Io(format!("{}: {}", path.display(), e))
        }
    }

    pub fn kind(&self) -> ScanErrorKind {
        match self {
            ProbeError::ToolMissing(_) => ScanErrorKind::ToolMissing,
            ProbeError::NonZeroExit { .. } => ScanErrorKind::NonZeroExit,
            ProbeError::Timeout { .. } => ScanErrorKind::Timeout,
            ProbeError::PermissionDenied(_) => ScanErrorKind::PermissionDenied,
            ProbeError::Io(_) => ScanErrorKind::Io,
            ProbeError::Cancelled => ScanErrorKind::Cancelled,
        }
    }

    /// Record for the scan result, attributed to `source`.
    pub fn to_scan_error(&self, source: &str) -> ScanError {
        ScanError::new(source, self.kind(), self.to_string())
    }
}

impl From<GatewayError> for ProbeError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::ToolMissing(tool) => ProbeError::ToolMissing(tool),
            GatewayError::PermissionDenied(tool) => ProbeError::PermissionDenied(tool),
            GatewayError::Timeout { tool, secs } => ProbeError::Timeout { tool, secs },
            GatewayError::Cancelled(_) => ProbeError::Cancelled,
            GatewayError::EmptyCommand => ProbeError::Io("empty command".to_string()),
            GatewayError::Io { tool, reason } => ProbeError::Io(format!("{}: {}", tool, reason)),
        }
    }
}

/// One persistence-mechanism category.
pub trait Probe: Send + Sync {
    /// Stable name, used for artifact ids, error sources and `disabled_probes`.
    fn name(&self) -> &'static str;

    fn platforms(&self) -> &'static [Platform];

    /// Push every artifact found to `out`. Artifacts pushed before an error
    /// are kept.
    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError>;

    fn supports(&self, platform: Platform) -> bool {
        self.platforms().contains(&platform)
    }
}

pub(crate) const WINDOWS: &[Platform] = &[Platform::Windows];
pub(crate) const MACOS: &[Platform] = &[Platform::Macos];
pub(crate) const LINUX: &[Platform] = &[Platform::Linux];
pub(crate) const UNIX: &[Platform] = &[Platform::Macos, Platform::Linux];
pub(crate) const ANDROID: &[Platform] = &[Platform::Android];
pub(crate) const DESKTOP: &[Platform] = &[Platform::Windows, Platform::Macos, Platform::Linux];

/// Every probe this build knows about, in scan order.
pub fn all_probes() -> Vec<Box<dyn Probe>> {
    let mut probes: Vec<Box<dyn Probe>> = Vec::new();
    probes.extend(windows::probes());
    probes.extend(macos::probes());
    probes.extend(linux::probes());
    probes.extend(unix::probes());
    probes.extend(android::probes());
    probes.push(Box::new(browser::BrowserExtensionsProbe));
    probes
}

/// Probes for `platform`, minus those disabled in the config.
pub fn registry_for(platform: Platform, config: &Config) -> Vec<Box<dyn Probe>> {
    all_probes()
        .into_iter()
        .filter(|p| p.supports(platform))
        .filter(|p| {
            let disabled = config.scan.disabled_probes.iter().any(|d| d == p.name());
            if disabled {
                log::debug!("probe {} disabled by configuration", p.name());
            }
            !disabled
        })
        .collect()
}

/// Keep going across independent locations, remembering the first failure.
#[derive(Default)]
pub(crate) struct FirstError(Option<ProbeError>);

impl FirstError {
    /// Record `result`'s error unless one is already held. Cancellation is
    /// returned immediately so the probe stops.
    pub fn note<T>(&mut self, result: Result<T, ProbeError>) -> Result<Option<T>, ProbeError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(ProbeError::Cancelled) => Err(ProbeError::Cancelled),
            Err(e) => {
                log::warn!("{}", e);
                if self.0.is_none() {
                    self.0 = Some(e);
                }
                Ok(None)
            }
        }
    }

    pub fn finish(self) -> Result<(), ProbeError> {
        match self.0 {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Read one definition file, parse it and annotate each artifact.
pub(crate) fn scan_file(
    ctx: &ProbeContext,
    path: &Path,
    grammar: crate::parser::Grammar,
    out: &mut Vec<Artifact>,
) -> Result<usize, ProbeError> {
    let Some(raw) = ctx.read_to_string(path)? else {
        return Ok(0);
    };
    let hint = crate::parser::SourceHint::new(ctx.platform, path.to_string_lossy(), grammar);
    let mut artifacts = crate::parser::parse(&raw, &hint);
    for artifact in &mut artifacts {
        ctx.annotate_file(artifact, path);
        ctx.check_target(artifact);
    }
    let found = artifacts.len();
    out.extend(artifacts);
    Ok(found)
}

/// `home` joined with a relative path given as components.
pub(crate) fn home_path(home: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(home.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_filters_platform_and_config() {
        let config = Config::default();
        let linux: Vec<&str> = registry_for(Platform::Linux, &config).iter().map(|p| p.name()).collect();
        assert!(linux.contains(&"systemd_units"));
        assert!(linux.contains(&"cron"));
        assert!(linux.contains(&"browser_extensions"));
        assert!(!linux.contains(&"launchd"));
        assert!(!linux.contains(&"registry_run_keys"));

        let mut config = Config::default();
        config.scan.disabled_probes = vec!["cron".to_string()];
        let names: Vec<&str> = registry_for(Platform::Linux, &config).iter().map(|p| p.name()).collect();
        assert!(!names.contains(&"cron"));

        assert!(registry_for(Platform::Unsupported, &Config::default()).is_empty());
    }

    #[test]
    fn test_android_has_no_desktop_probes() {
        let names: Vec<&str> = registry_for(Platform::Android, &Config::default())
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["accessibility_services", "device_admins"]);
    }

    #[test]
    fn test_probe_names_unique() {
        let mut names: Vec<&str> = all_probes().iter().map(|p| p.name()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 23);
    }

    #[test]
    fn test_gateway_error_mapping() {
        let e = ProbeError::from(GatewayError::Timeout {
            tool: "schtasks".into(),
            secs: 10,
        });
        assert_eq!(e.kind(), ScanErrorKind::Timeout);
        let record = e.to_scan_error("scheduled_tasks");
        assert_eq!(record.source, "scheduled_tasks");
        assert_eq!(record.message, "schtasks timed out after 10s");
    }

    #[test]
    fn test_first_error_keeps_first() {
        let mut errors = FirstError::default();
        assert_eq!(errors.note::<()>(Err(ProbeError::Io("a".into()))).unwrap(), None);
        assert_eq!(errors.note::<()>(Err(ProbeError::Io("b".into()))).unwrap(), None);
        assert_eq!(errors.note(Ok(3)).unwrap(), Some(3));
        assert_eq!(errors.finish(), Err(ProbeError::Io("a".into())));
        assert!(FirstError::default().note::<()>(Err(ProbeError::Cancelled)).is_err());
    }
}
