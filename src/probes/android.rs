//! Android probes: enabled accessibility services and active device admins.
//!
//! Both run on the device shell. The package's APK path comes from
//! `pm path` so the oracle has a file to hash.

use super::{Probe, ProbeContext, ProbeError, ANDROID};
use crate::core::types::{Artifact, Platform};
use crate::parser::{self, Grammar, SourceHint};

pub(super) fn probes() -> Vec<Box<dyn Probe>> {
    vec![Box::new(AccessibilityServicesProbe), Box::new(DeviceAdminsProbe)]
}

/// `package:/data/app/.../base.apk` lines from `pm path`.
fn apk_path(ctx: &ProbeContext, package: &str) -> Option<String> {
    match ctx.run(&["pm", "path", package]) {
        Ok(output) if output.is_success() => output
            .stdout
            .lines()
            .filter_map(|l| l.trim().strip_prefix("package:"))
            .find(|p| p.ends_with("base.apk"))
            .or_else(|| {
                output
                    .stdout
                    .lines()
                    .find_map(|l| l.trim().strip_prefix("package:"))
            })
            .map(str::to_string),
        Ok(output) => {
            log::debug!("pm path {} exited {}", package, output.exit_code);
            None
        }
        Err(e) => {
            log::debug!("pm path {}: {}", package, e);
            None
        }
    }
}

fn scan_packages(
    ctx: &ProbeContext,
    argv: &[&str],
    location: &str,
    grammar: Grammar,
    out: &mut Vec<Artifact>,
) -> Result<(), ProbeError> {
    let output = ctx.run_checked(argv)?;
    let hint = SourceHint::new(ctx.platform, location, grammar);
    for mut artifact in parser::parse(&output.stdout, &hint) {
        if ctx.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        let package = artifact.meta("package").map(str::to_string);
        if let Some(apk) = package.and_then(|p| apk_path(ctx, &p)) {
            artifact = artifact.with_path(apk);
        }
        out.push(artifact);
    }
    Ok(())
}

pub struct AccessibilityServicesProbe;

impl Probe for AccessibilityServicesProbe {
    fn name(&self) -> &'static str {
        "accessibility_services"
    }

    fn platforms(&self) -> &'static [Platform] {
        ANDROID
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        scan_packages(
            ctx,
            &["settings", "get", "secure", "enabled_accessibility_services"],
            "settings secure enabled_accessibility_services",
            Grammar::AccessibilitySettings,
            out,
        )
    }
}

pub struct DeviceAdminsProbe;

impl Probe for DeviceAdminsProbe {
    fn name(&self) -> &'static str {
        "device_admins"
    }

    fn platforms(&self) -> &'static [Platform] {
        ANDROID
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        scan_packages(
            ctx,
            &["dumpsys", "device_policy"],
            "dumpsys device_policy",
            Grammar::DevicePolicy,
            out,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MechanismKind;
    use crate::gateway::{CommandOutput, GatewayError, ScriptedGateway};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(gw: ScriptedGateway) -> ProbeContext {
        ProbeContext::new(Platform::Android, Arc::new(gw), Duration::from_secs(5))
            .with_home_dirs(Vec::new())
            .isolated_env()
    }

    #[test]
    fn test_accessibility_services_with_apk_paths() {
        let gw = ScriptedGateway::new()
            .on(
                &["settings", "get", "secure", "enabled_accessibility_services"],
                "com.evil.keys/com.evil.keys.Svc:com.google.talkback/.TalkBack\n",
            )
            .on(
                &["pm", "path", "com.evil.keys"],
                "package:/data/app/~~x/com.evil.keys-1/split_config.apk\npackage:/data/app/~~x/com.evil.keys-1/base.apk\n",
            )
            .on_output(&["pm", "path", "com.google.talkback"], CommandOutput::failure(1, ""));

        let mut out = Vec::new();
        AccessibilityServicesProbe.scan(&context(gw), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].mechanism_kind, MechanismKind::AccessibilityService);
        assert_eq!(
            out[0].path,
            Some(PathBuf::from("/data/app/~~x/com.evil.keys-1/base.apk"))
        );
        assert!(out[1].path.is_none());
    }

    #[test]
    fn test_device_admins_without_pm() {
        let gw = ScriptedGateway::new().on(
            &["dumpsys", "device_policy"],
            "  admin=ComponentInfo{com.corp.mdm/com.corp.mdm.Receiver}\n",
        );
        let mut out = Vec::new();
        DeviceAdminsProbe.scan(&context(gw), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "com.corp.mdm");
        assert!(out[0].path.is_none());
    }

    #[test]
    fn test_settings_failure_is_probe_error() {
        let gw = ScriptedGateway::new().on_error(
            &["settings", "get", "secure", "enabled_accessibility_services"],
            GatewayError::PermissionDenied("settings".into()),
        );
        let mut out = Vec::new();
        let err = AccessibilityServicesProbe.scan(&context(gw), &mut out).unwrap_err();
        assert_eq!(err, ProbeError::PermissionDenied("settings".into()));
    }
}
