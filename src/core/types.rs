//! Core type definitions shared by every platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Operating-system family an artifact was collected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Linux,
    Android,
    Unsupported,
}

impl Platform {
    /// Platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unsupported
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Platform::Unsupported)
    }

    /// Whether this is a Unix-like desktop platform (cron, shell profiles, ssh).
    pub fn is_unix_desktop(&self) -> bool {
        matches!(self, Platform::Macos | Platform::Linux)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Macos => "macos",
            Platform::Linux => "linux",
            Platform::Android => "android",
            Platform::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Windows => write!(f, "Windows"),
            Platform::Macos => write!(f, "macOS"),
            Platform::Linux => write!(f, "Linux"),
            Platform::Android => write!(f, "Android"),
            Platform::Unsupported => write!(f, "Unsupported"),
        }
    }
}

/// Risk assigned to a persistence artifact.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Matches the documented operating-system default
    Safe,
    /// Ordinary third-party persistence
    #[default]
    Low,
    /// Worth a look
    Medium,
    /// Likely abuse of the mechanism
    High,
    /// Confirmed or near-certain malicious
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::Safe,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// The next level up, saturating at critical.
    pub fn escalated(self) -> Self {
        match self {
            RiskLevel::Safe => RiskLevel::Low,
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "SAFE"),
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Persistence mechanism an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    /// Task Scheduler entries and crontab lines
    ScheduledTask,
    /// Registry Run/RunOnce values
    AutostartRegistry,
    /// launchd agents and daemons
    AutostartPlist,
    /// systemd units
    AutostartUnit,
    /// Startup folders, XDG autostart, login items
    StartupItem,
    /// Windows services
    Service,
    /// rc.local and init scripts
    BootScript,
    /// Shell startup files
    ShellProfile,
    BrowserExtension,
    /// Drivers, kernel extensions, modules-load lists
    KernelModule,
    SshAuthorizedKey,
    /// ld.so.preload, AppInit_DLLs, DYLD_INSERT_LIBRARIES
    PreloadLibrary,
    /// LSA security/authentication/notification packages
    SecurityPackage,
    /// Session Manager BootExecute
    BootExecute,
    /// Winlogon Shell/Userinit
    WinlogonHelper,
    /// Image File Execution Options debugger
    ImageHijack,
    AccessibilityService,
    DeviceAdmin,
}

impl MechanismKind {
    /// Mechanisms historically abused for hijacking; they start at high.
    pub fn is_hijack_prone(&self) -> bool {
        matches!(
            self,
            MechanismKind::PreloadLibrary
                | MechanismKind::SecurityPackage
                | MechanismKind::BootExecute
                | MechanismKind::WinlogonHelper
                | MechanismKind::ImageHijack
        )
    }

    /// Whether the artifact path points at code that can carry a signature.
    pub fn is_signable(&self) -> bool {
        !matches!(
            self,
            MechanismKind::SshAuthorizedKey
                | MechanismKind::ShellProfile
                | MechanismKind::BrowserExtension
                | MechanismKind::AccessibilityService
                | MechanismKind::DeviceAdmin
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismKind::ScheduledTask => "scheduled_task",
            MechanismKind::AutostartRegistry => "autostart_registry",
            MechanismKind::AutostartPlist => "autostart_plist",
            MechanismKind::AutostartUnit => "autostart_unit",
            MechanismKind::StartupItem => "startup_item",
            MechanismKind::Service => "service",
            MechanismKind::BootScript => "boot_script",
            MechanismKind::ShellProfile => "shell_profile",
            MechanismKind::BrowserExtension => "browser_extension",
            MechanismKind::KernelModule => "kernel_module",
            MechanismKind::SshAuthorizedKey => "ssh_authorized_key",
            MechanismKind::PreloadLibrary => "preload_library",
            MechanismKind::SecurityPackage => "security_package",
            MechanismKind::BootExecute => "boot_execute",
            MechanismKind::WinlogonHelper => "winlogon_helper",
            MechanismKind::ImageHijack => "image_hijack",
            MechanismKind::AccessibilityService => "accessibility_service",
            MechanismKind::DeviceAdmin => "device_admin",
        }
    }
}

impl std::fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MechanismKind::ScheduledTask => write!(f, "Scheduled Task"),
            MechanismKind::AutostartRegistry => write!(f, "Registry Autostart"),
            MechanismKind::AutostartPlist => write!(f, "Launchd Plist"),
            MechanismKind::AutostartUnit => write!(f, "Systemd Unit"),
            MechanismKind::StartupItem => write!(f, "Startup Item"),
            MechanismKind::Service => write!(f, "Service"),
            MechanismKind::BootScript => write!(f, "Boot Script"),
            MechanismKind::ShellProfile => write!(f, "Shell Profile"),
            MechanismKind::BrowserExtension => write!(f, "Browser Extension"),
            MechanismKind::KernelModule => write!(f, "Kernel Module"),
            MechanismKind::SshAuthorizedKey => write!(f, "SSH Authorized Key"),
            MechanismKind::PreloadLibrary => write!(f, "Preload Library"),
            MechanismKind::SecurityPackage => write!(f, "Security Package"),
            MechanismKind::BootExecute => write!(f, "BootExecute"),
            MechanismKind::WinlogonHelper => write!(f, "Winlogon"),
            MechanismKind::ImageHijack => write!(f, "IFEO"),
            MechanismKind::AccessibilityService => write!(f, "Accessibility Service"),
            MechanismKind::DeviceAdmin => write!(f, "Device Admin"),
        }
    }
}

/// Trust classification of a code signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningTier {
    /// Signed by the OS vendor or owned by the system package manager
    PlatformTrusted,
    /// Valid signature chaining to a trusted third-party root
    ThirdPartyTrusted,
    Unsigned,
    /// Signature present but broken or untrusted
    Invalid,
    /// Not inspected, or inspection failed
    #[default]
    Unknown,
}

impl SigningTier {
    pub fn is_trusted(&self) -> bool {
        matches!(
            self,
            SigningTier::PlatformTrusted | SigningTier::ThirdPartyTrusted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SigningTier::PlatformTrusted => "platform_trusted",
            SigningTier::ThirdPartyTrusted => "third_party_trusted",
            SigningTier::Unsigned => "unsigned",
            SigningTier::Invalid => "invalid",
            SigningTier::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SigningTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningTier::PlatformTrusted => write!(f, "Platform"),
            SigningTier::ThirdPartyTrusted => write!(f, "Third-party"),
            SigningTier::Unsigned => write!(f, "Unsigned"),
            SigningTier::Invalid => write!(f, "Invalid"),
            SigningTier::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Metadata key holding the hex bytes of a path that is not valid UTF-8.
pub const RAW_PATH_META: &str = "raw_path_hex";

fn serialize_lossy_path<S: serde::Serializer>(
    path: &Option<PathBuf>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match path {
        Some(path) => serializer.serialize_some(&path.to_string_lossy()),
        None => serializer.serialize_none(),
    }
}

/// One discovered persistence entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Identifier, stable within a scan
    pub id: String,
    pub platform: Platform,
    pub mechanism_kind: MechanismKind,
    /// Name of the entry (value name, label, task name...)
    pub name: String,
    /// Executable, script or file the entry resolves to
    #[serde(serialize_with = "serialize_lossy_path")]
    pub path: Option<PathBuf>,
    /// Where the entry was found (registry key, plist file, unit file...)
    pub location: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Permission bits as an octal string (e.g. "0644")
    #[serde(default)]
    pub permissions: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signing_tier: SigningTier,
    /// SHA-256 of the referenced file, when hashed
    #[serde(rename = "hash", default)]
    pub content_hash: Option<String>,
    #[serde(rename = "risk", default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Artifact {
    /// Create a new artifact with low risk and no evidence.
    pub fn new(
        platform: Platform,
        mechanism_kind: MechanismKind,
        name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            platform,
            mechanism_kind,
            name: name.into(),
            path: None,
            location: location.into(),
            command: None,
            owner: None,
            permissions: None,
            created_at: None,
            modified_at: None,
            signing_tier: SigningTier::Unknown,
            content_hash: None,
            risk_level: RiskLevel::Low,
            indicators: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Set the executable path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_path(path);
        self
    }

    /// Set the executable path. A path that is not valid UTF-8 is stored
    /// lossily and its bytes are kept under [`RAW_PATH_META`].
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if path.to_str().is_some() {
            self.metadata.remove(RAW_PATH_META);
            self.path = Some(path);
        } else {
            self.metadata.insert(
                RAW_PATH_META.to_string(),
                hex::encode(path.as_os_str().as_encoded_bytes()),
            );
            self.path = Some(PathBuf::from(path.to_string_lossy().into_owned()));
        }
    }

    /// The path as it exists on disk.
    pub fn raw_path(&self) -> Option<PathBuf> {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            let raw = self.meta(RAW_PATH_META).and_then(|h| hex::decode(h).ok());
            if let Some(bytes) = raw {
                return Some(PathBuf::from(std::ffi::OsStr::from_bytes(&bytes)));
            }
        }
        self.path.clone()
    }

    /// Set the command line.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        let command = command.into();
        if !command.trim().is_empty() {
            self.command = Some(command);
        }
        self
    }

    /// Add a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Raise the risk to at least `level`, recording why. Never lowers.
    pub fn raise(&mut self, level: RiskLevel, indicator: impl Into<String>) {
        if level > self.risk_level {
            self.risk_level = level;
        }
        self.push_indicator(indicator);
    }

    /// Record a known-malware match. The only path that skips the max rule.
    pub fn force_critical(&mut self, indicator: impl Into<String>) {
        self.risk_level = RiskLevel::Critical;
        self.push_indicator(indicator);
    }

    /// Append an indicator without touching the risk level.
    pub fn push_indicator(&mut self, indicator: impl Into<String>) {
        let indicator = indicator.into();
        if !indicator.is_empty() && !self.indicators.contains(&indicator) {
            self.indicators.push(indicator);
        }
    }

    /// Key used to drop exact duplicates within one scan.
    pub fn dedup_key(&self) -> (MechanismKind, &str, &str, Option<&PathBuf>, Option<&str>) {
        (
            self.mechanism_kind,
            self.location.as_str(),
            self.name.as_str(),
            self.path.as_ref(),
            self.command.as_deref(),
        )
    }

    /// Text the token grammar is matched against: command, then path.
    pub fn evidence_text(&self) -> String {
        let mut text = String::new();
        if let Some(ref cmd) = self.command {
            text.push_str(cmd);
        }
        if let Some(ref path) = self.path {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&path.to_string_lossy());
        }
        text
    }
}

/// Final state of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Completed => write!(f, "Completed"),
            ScanStatus::Cancelled => write!(f, "Cancelled"),
            ScanStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Classification of a recorded scan error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorKind {
    ToolMissing,
    NonZeroExit,
    Timeout,
    PermissionDenied,
    Io,
    Cancelled,
    UnsupportedPlatform,
    NoProbes,
}

/// A probe- or orchestrator-level failure recorded in a scan result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    /// Probe name, or "orchestrator"
    pub source: String,
    pub kind: ScanErrorKind,
    pub message: String,
}

impl ScanError {
    pub fn new(source: impl Into<String>, kind: ScanErrorKind, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of one scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub scan_id: String,
    pub platform: Platform,
    pub status: ScanStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub items: Vec<Artifact>,
    pub errors: Vec<ScanError>,
}

impl ScanResult {
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    /// Item counts for every risk level, including zeroes.
    pub fn counts_by_risk(&self) -> BTreeMap<RiskLevel, usize> {
        let mut counts: BTreeMap<RiskLevel, usize> =
            RiskLevel::ALL.iter().map(|level| (*level, 0)).collect();
        for item in &self.items {
            *counts.entry(item.risk_level).or_insert(0) += 1;
        }
        counts
    }

    /// Items at or above the given level.
    pub fn items_at_least(&self, level: RiskLevel) -> impl Iterator<Item = &Artifact> {
        self.items.iter().filter(move |a| a.risk_level >= level)
    }

    /// Probes that failed, for "N of M checks completed" reporting.
    /// Distinct error sources, sorted.
    pub fn failed_sources(&self) -> Vec<&str> {
        self.errors
            .iter()
            .map(|e| e.source.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn duration_secs(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}
