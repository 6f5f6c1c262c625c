//! Risk classification.
//!
//! Two pure passes over an artifact. Pass one runs on what the probe saw;
//! pass two runs after the signature oracle, for qualifying artifacts only.
//! Every escalation is combined by maximum through [`Artifact::raise`].

pub mod defaults;
pub mod tokens;

use crate::core::types::{Artifact, MechanismKind, RiskLevel, SigningTier};
use crate::intel::ThreatIntelStore;
use crate::signature::Inspection;

pub use defaults::is_documented_default;

/// Directories anyone can write to.
const WRITABLE_LOCATIONS: &[&str] = &[
    r"\temp\",
    r"\tmp\",
    r"\appdata\local\temp\",
    r"\users\public\",
    r"\windows\temp\",
    r"\programdata\",
    r"\downloads\",
    "/tmp/",
    "/var/tmp/",
    "/dev/shm/",
    "/private/tmp/",
    "/users/shared/",
];

/// Extension permissions that alone warrant a look.
const RISKY_PERMISSIONS: &[&str] = &["debugger", "nativeMessaging"];

const BROAD_HOSTS: &[&str] = &["<all_urls>", "*://*/*", "http://*/*", "https://*/*"];

/// Starting risk before any evidence is considered.
pub fn baseline(artifact: &Artifact) -> (RiskLevel, Option<&'static str>) {
    if is_documented_default(artifact) {
        return (RiskLevel::Safe, None);
    }
    match artifact.mechanism_kind {
        kind if kind.is_hijack_prone() => (RiskLevel::High, Some("hijack-prone mechanism")),
        MechanismKind::AccessibilityService => {
            (RiskLevel::Medium, Some("accessibility service can read the screen"))
        }
        MechanismKind::DeviceAdmin => (RiskLevel::Medium, Some("device administrator")),
        _ => (RiskLevel::Low, None),
    }
}

fn writable_location(path: &str) -> Option<&'static str> {
    let lower = path.to_lowercase();
    WRITABLE_LOCATIONS
        .iter()
        .find(|loc| lower.contains(**loc))
        .copied()
}

/// Parse a permissions string such as "0644", "644" or "0o777".
fn mode_bits(permissions: &str) -> Option<u32> {
    let digits = permissions.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).ok()
}

fn has_masquerading_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    [".exe.", ".dll.", ".pdf.exe", ".doc.exe"]
        .iter()
        .any(|ext| lower.contains(ext))
}

fn risky_extension_permissions(permissions: &str) -> Vec<String> {
    let granted: Vec<&str> = permissions
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut risky: Vec<String> = RISKY_PERMISSIONS
        .iter()
        .filter(|p| granted.contains(*p))
        .map(|p| p.to_string())
        .collect();

    let broad = granted.iter().find(|p| BROAD_HOSTS.contains(*p));
    if let Some(host) = broad {
        if granted.contains(&"webRequest") {
            risky.push(format!("{} with webRequest", host));
        }
    }
    risky
}

/// First pass: baseline and every escalation visible without hashing.
pub fn pass_one(artifact: &mut Artifact, intel: &ThreatIntelStore) {
    let (level, reason) = baseline(artifact);
    artifact.risk_level = level;
    if let Some(reason) = reason {
        artifact.push_indicator(reason);
    }

    let evidence = artifact.evidence_text();
    for name in tokens::matches(&evidence) {
        artifact.raise(RiskLevel::Critical, format!("suspicious token: {}", name));
    }

    for domain in intel.domains_in(&evidence) {
        artifact.raise(RiskLevel::Critical, format!("malicious domain: {}", domain));
    }

    if let Some(path) = artifact.path.as_ref().map(|p| p.to_string_lossy().into_owned()) {
        if let Some(loc) = writable_location(&path) {
            artifact.raise(
                RiskLevel::High,
                format!("runs from writable location ({})", loc.trim_matches(['\\', '/'])),
            );
        }
        if has_masquerading_extension(&path) {
            artifact.raise(RiskLevel::Medium, "double file extension");
        }
    }

    let world_writable = artifact
        .permissions
        .as_deref()
        .and_then(mode_bits)
        .is_some_and(|mode| mode & 0o002 != 0);
    if world_writable {
        artifact.raise(RiskLevel::High, "world-writable file");
    }

    if artifact.mechanism_kind == MechanismKind::BrowserExtension {
        let permissions = artifact.meta("permissions").unwrap_or_default().to_string();
        for perm in risky_extension_permissions(&permissions) {
            artifact.raise(RiskLevel::Medium, format!("high-risk permission: {}", perm));
        }
    }

    if artifact.meta("target_exists") == Some("false") {
        artifact.raise(RiskLevel::Medium, "referenced file missing");
    }
}

/// Whether the artifact goes on to hashing and signature inspection.
pub fn qualifies_for_inspection(artifact: &Artifact, min_risk: RiskLevel) -> bool {
    artifact.path.is_some() && artifact.risk_level >= min_risk
}

/// Second pass: fold in what the signature oracle learned.
pub fn pass_two(artifact: &mut Artifact, inspection: &Inspection, intel: &ThreatIntelStore) {
    artifact.signing_tier = inspection.signing_tier;
    if inspection.sha256.is_some() {
        artifact.content_hash = inspection.sha256.clone();
    }

    let known_bad = [inspection.sha256.as_deref(), inspection.md5.as_deref()]
        .into_iter()
        .flatten()
        .any(|h| intel.is_malicious_hash(h));
    if known_bad {
        artifact.force_critical("known-malware hash match");
        return;
    }

    match inspection.signing_tier {
        SigningTier::Unsigned if artifact.mechanism_kind.is_signable() => {
            let level = artifact.risk_level.escalated();
            artifact.raise(level, "unsigned binary");
        }
        SigningTier::Invalid => {
            let level = artifact.risk_level.escalated();
            artifact.raise(level, "invalid signature");
        }
        SigningTier::ThirdPartyTrusted if intel.has_publishers() => {
            if let Some(ref authority) = inspection.authority {
                if !intel.is_trusted_publisher(authority) {
                    artifact.push_indicator(format!("publisher not on trusted list: {}", authority));
                }
            }
        }
        _ => {}
    }
}
