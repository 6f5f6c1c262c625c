//! Documented operating-system defaults. A match starts the artifact at safe.

use crate::core::types::{Artifact, MechanismKind};

/// Packages Windows registers under the LSA keys on a clean install.
const DEFAULT_LSA_PACKAGES: &[&str] = &[
    "kerberos",
    "msv1_0",
    "schannel",
    "wdigest",
    "tspkg",
    "pku2u",
    "cloudap",
    "negoextender",
    "scecli",
];

/// Run values Windows ships with, as `(value name, command)`.
const DEFAULT_RUN_VALUES: &[(&str, &str)] = &[
    (
        "SecurityHealth",
        r"%windir%\system32\securityhealthsystray.exe",
    ),
    (
        "SecurityHealth",
        r"c:\windows\system32\securityhealthsystray.exe",
    ),
];

fn normalize(s: &str) -> String {
    s.trim().trim_matches('"').to_lowercase()
}

fn is_default_winlogon(artifact: &Artifact) -> bool {
    let value = artifact
        .meta("value")
        .or(artifact.command.as_deref())
        .map(normalize)
        .unwrap_or_default();
    let value = value.trim_end_matches(',');
    match artifact.meta("value_name").unwrap_or(&artifact.name) {
        "Shell" => value == "explorer.exe" || value == r"c:\windows\explorer.exe",
        "Userinit" => {
            value == r"c:\windows\system32\userinit.exe" || value == "userinit.exe"
        }
        _ => false,
    }
}

/// Whether `artifact` is what the operating system installs there itself.
pub fn is_documented_default(artifact: &Artifact) -> bool {
    match artifact.mechanism_kind {
        MechanismKind::BootExecute => {
            let entry = artifact.command.as_deref().unwrap_or(&artifact.name);
            let words: Vec<String> = entry.split_whitespace().map(str::to_lowercase).collect();
            words == ["autocheck", "autochk", "*"]
        }
        MechanismKind::WinlogonHelper => is_default_winlogon(artifact),
        MechanismKind::SecurityPackage => {
            DEFAULT_LSA_PACKAGES.contains(&normalize(&artifact.name).as_str())
        }
        MechanismKind::AutostartRegistry => {
            let name = artifact.meta("value_name").unwrap_or(&artifact.name);
            let command = artifact.command.as_deref().map(normalize).unwrap_or_default();
            DEFAULT_RUN_VALUES
                .iter()
                .any(|(n, c)| *n == name && command == *c)
        }
        MechanismKind::BrowserExtension => artifact.meta("builtin") == Some("true"),
        MechanismKind::KernelModule => artifact
            .meta("bundle_id")
            .is_some_and(|id| id.starts_with("com.apple.")),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Platform;

    fn windows(kind: MechanismKind, name: &str) -> Artifact {
        Artifact::new(Platform::Windows, kind, name, r"HKLM\SYSTEM")
    }

    #[test]
    fn test_boot_execute_default() {
        let default = windows(MechanismKind::BootExecute, "autocheck autochk *")
            .with_command("autocheck autochk *");
        assert!(is_documented_default(&default));

        let extra = windows(MechanismKind::BootExecute, "autocheck evil *")
            .with_command("autocheck evil *");
        assert!(!is_documented_default(&extra));
    }

    #[test]
    fn test_winlogon_defaults() {
        let shell = windows(MechanismKind::WinlogonHelper, "Shell")
            .with_command("explorer.exe")
            .with_meta("value_name", "Shell")
            .with_meta("value", "explorer.exe");
        assert!(is_documented_default(&shell));

        let userinit = windows(MechanismKind::WinlogonHelper, "Userinit")
            .with_meta("value_name", "Userinit")
            .with_meta("value", r"C:\Windows\system32\userinit.exe,");
        assert!(is_documented_default(&userinit));

        let hijacked = windows(MechanismKind::WinlogonHelper, "Shell")
            .with_meta("value_name", "Shell")
            .with_meta("value", r"explorer.exe, C:\Users\Public\x.exe");
        assert!(!is_documented_default(&hijacked));
    }

    #[test]
    fn test_lsa_packages() {
        assert!(is_documented_default(&windows(MechanismKind::SecurityPackage, "msv1_0")));
        assert!(is_documented_default(&windows(MechanismKind::SecurityPackage, "Kerberos")));
        assert!(!is_documented_default(&windows(MechanismKind::SecurityPackage, "mimilib")));
    }

    #[test]
    fn test_run_value_default() {
        let health = windows(MechanismKind::AutostartRegistry, "SecurityHealth")
            .with_command(r"%windir%\system32\SecurityHealthSystray.exe")
            .with_meta("value_name", "SecurityHealth");
        assert!(is_documented_default(&health));

        let impostor = windows(MechanismKind::AutostartRegistry, "SecurityHealth")
            .with_command(r"C:\Users\Public\SecurityHealthSystray.exe");
        assert!(!is_documented_default(&impostor));
    }

    #[test]
    fn test_builtin_extension_and_apple_kext() {
        let addon = Artifact::new(Platform::Linux, MechanismKind::BrowserExtension, "Screenshots", "x")
            .with_meta("builtin", "true");
        assert!(is_documented_default(&addon));

        let kext = Artifact::new(Platform::Macos, MechanismKind::KernelModule, "com.apple.iokit.IOHIDFamily", "kmutil")
            .with_meta("bundle_id", "com.apple.iokit.IOHIDFamily");
        assert!(is_documented_default(&kext));

        let third = Artifact::new(Platform::Macos, MechanismKind::KernelModule, "com.acme.driver", "kmutil")
            .with_meta("bundle_id", "com.acme.driver");
        assert!(!is_documented_default(&third));
    }

    #[test]
    fn test_other_kinds_never_default() {
        let task = Artifact::new(Platform::Linux, MechanismKind::ScheduledTask, "autocheck autochk *", "/etc/crontab");
        assert!(!is_documented_default(&task));
    }
}
