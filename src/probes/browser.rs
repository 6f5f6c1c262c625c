//! Browser extensions for Chromium-family browsers and Firefox.

use super::{home_path, scan_file, FirstError, Probe, ProbeContext, ProbeError, DESKTOP};
use crate::core::types::{Artifact, Platform};
use crate::parser::Grammar;
use std::path::{Path, PathBuf};

/// Browser label and user-data directory relative to a home directory.
type BrowserDir = (&'static str, &'static [&'static str]);

const CHROMIUM_WINDOWS: &[BrowserDir] = &[
    ("chrome", &["AppData", "Local", "Google", "Chrome", "User Data"]),
    ("chromium", &["AppData", "Local", "Chromium", "User Data"]),
    ("brave", &["AppData", "Local", "BraveSoftware", "Brave-Browser", "User Data"]),
    ("edge", &["AppData", "Local", "Microsoft", "Edge", "User Data"]),
];

const CHROMIUM_MACOS: &[BrowserDir] = &[
    ("chrome", &["Library", "Application Support", "Google", "Chrome"]),
    ("chromium", &["Library", "Application Support", "Chromium"]),
    ("brave", &["Library", "Application Support", "BraveSoftware", "Brave-Browser"]),
    ("edge", &["Library", "Application Support", "Microsoft Edge"]),
];

const CHROMIUM_LINUX: &[BrowserDir] = &[
    ("chrome", &[".config", "google-chrome"]),
    ("chromium", &[".config", "chromium"]),
    ("brave", &[".config", "BraveSoftware", "Brave-Browser"]),
    ("edge", &[".config", "microsoft-edge"]),
];

const FIREFOX_WINDOWS: &[&str] = &["AppData", "Roaming", "Mozilla", "Firefox", "Profiles"];
const FIREFOX_MACOS: &[&str] = &["Library", "Application Support", "Firefox", "Profiles"];
const FIREFOX_LINUX: &[&str] = &[".mozilla", "firefox"];

pub struct BrowserExtensionsProbe;

impl BrowserExtensionsProbe {
    fn layout(platform: Platform) -> (&'static [BrowserDir], &'static [&'static str]) {
        match platform {
            Platform::Windows => (CHROMIUM_WINDOWS, FIREFOX_WINDOWS),
            Platform::Macos => (CHROMIUM_MACOS, FIREFOX_MACOS),
            _ => (CHROMIUM_LINUX, FIREFOX_LINUX),
        }
    }

    /// `Default` and `Profile N` directories under a user-data directory.
    fn chromium_profiles(ctx: &ProbeContext, user_data: &Path) -> Result<Vec<PathBuf>, ProbeError> {
        Ok(ctx
            .list_dir(user_data)?
            .into_iter()
            .filter(|p| ctx.is_dir(p))
            .filter(|p| {
                p.file_name().is_some_and(|n| {
                    let n = n.to_string_lossy();
                    n == "Default" || n.starts_with("Profile ")
                })
            })
            .collect())
    }

    /// Every `Extensions/<id>/<version>/manifest.json` in one profile.
    fn scan_chromium_profile(
        ctx: &ProbeContext,
        browser: &str,
        profile: &Path,
        errors: &mut FirstError,
        out: &mut Vec<Artifact>,
    ) -> Result<(), ProbeError> {
        let extensions = profile.join("Extensions");
        let Some(ids) = errors.note(ctx.list_dir(&extensions))? else {
            return Ok(());
        };
        for id_dir in ids.into_iter().filter(|p| ctx.is_dir(p)) {
            let Some(versions) = errors.note(ctx.list_dir(&id_dir))? else {
                continue;
            };
            for version in versions.into_iter().filter(|p| ctx.is_dir(p)) {
                let manifest = version.join("manifest.json");
                let grammar = Grammar::ChromiumManifest {
                    browser: browser.to_string(),
                };
                let before = out.len();
                errors.note(scan_file(ctx, &manifest, grammar, out))?;
                let profile_name = profile
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for artifact in &mut out[before..] {
                    artifact
                        .metadata
                        .insert("profile".to_string(), profile_name.clone());
                }
            }
        }
        Ok(())
    }

    fn scan_firefox(
        ctx: &ProbeContext,
        profiles_dir: &Path,
        errors: &mut FirstError,
        out: &mut Vec<Artifact>,
    ) -> Result<(), ProbeError> {
        let Some(profiles) = errors.note(ctx.list_dir(profiles_dir))? else {
            return Ok(());
        };
        for profile in profiles.into_iter().filter(|p| ctx.is_dir(p)) {
            let file = profile.join("extensions.json");
            errors.note(scan_file(ctx, &file, Grammar::FirefoxExtensions, out))?;
        }
        Ok(())
    }
}

impl Probe for BrowserExtensionsProbe {
    fn name(&self) -> &'static str {
        "browser_extensions"
    }

    fn platforms(&self) -> &'static [Platform] {
        DESKTOP
    }

    fn scan(&self, ctx: &ProbeContext, out: &mut Vec<Artifact>) -> Result<(), ProbeError> {
        let (chromium, firefox) = Self::layout(ctx.platform);
        let mut errors = FirstError::default();

        for home in ctx.home_dirs() {
            if ctx.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }
            for (browser, parts) in chromium {
                let user_data = home_path(home, parts);
                let Some(profiles) = errors.note(Self::chromium_profiles(ctx, &user_data))? else {
                    continue;
                };
                for profile in profiles {
                    Self::scan_chromium_profile(ctx, browser, &profile, &mut errors, out)?;
                }
            }
            Self::scan_firefox(ctx, &home_path(home, firefox), &mut errors, out)?;
        }

        errors.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MechanismKind;
    use crate::gateway::ScriptedGateway;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn context(root: &Path) -> ProbeContext {
        ProbeContext::new(Platform::Linux, Arc::new(ScriptedGateway::new()), Duration::from_secs(5))
            .with_root(root)
            .with_home_dirs(vec![PathBuf::from("/home/u")])
            .isolated_env()
    }

    #[test]
    fn test_chromium_and_firefox_extensions() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "home/u/.config/google-chrome/Default/Extensions/abcdefgh/1.2.0_0/manifest.json",
            r#"{"name":"Page Helper","version":"1.2.0","permissions":["debugger","storage"]}"#,
        );
        write(
            dir.path(),
            "home/u/.config/brave/Default/Extensions/zzz/1.0/manifest.json",
            r#"{"name":"Not a real brave path"}"#,
        );
        write(
            dir.path(),
            "home/u/.config/BraveSoftware/Brave-Browser/Profile 2/Extensions/qrst/3.1/manifest.json",
            r#"{"name":"Wallet","version":"3.1"}"#,
        );
        write(
            dir.path(),
            "home/u/.config/google-chrome/System Profile/Extensions/skip/1/manifest.json",
            r#"{"name":"Ignored"}"#,
        );
        write(
            dir.path(),
            "home/u/.mozilla/firefox/ab12.default-release/extensions.json",
            r#"{"addons":[{"id":"ublock@example.org","type":"extension","location":"app-profile","active":true,"defaultLocale":{"name":"uBlock"}}]}"#,
        );

        let mut out = Vec::new();
        BrowserExtensionsProbe.scan(&context(dir.path()), &mut out).unwrap();
        let names: Vec<&str> = out.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Page Helper", "Wallet", "uBlock"]);
        assert!(out.iter().all(|a| a.mechanism_kind == MechanismKind::BrowserExtension));
        assert_eq!(out[0].meta("extension_id"), Some("abcdefgh"));
        assert_eq!(out[0].meta("browser"), Some("chrome"));
        assert_eq!(out[1].meta("profile"), Some("Profile 2"));
        assert_eq!(out[2].meta("browser"), Some("firefox"));
    }

    #[test]
    fn test_no_browsers_installed() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        BrowserExtensionsProbe.scan(&context(dir.path()), &mut out).unwrap();
        assert!(out.is_empty());
    }
}
