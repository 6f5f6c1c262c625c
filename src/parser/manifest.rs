//! Browser extension manifests.

use super::SourceHint;
use crate::core::types::{Artifact, MechanismKind};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Chromium-family `manifest.json`, located at `Extensions/<id>/<version>/manifest.json`.
pub fn parse_chromium(raw: &str, browser: &str, hint: &SourceHint) -> Vec<Artifact> {
    let doc: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("unreadable manifest {}: {}", hint.location, e);
            return Vec::new();
        }
    };
    let Some(name) = doc.get("name").and_then(Value::as_str) else {
        return Vec::new();
    };

    let manifest_path = Path::new(&hint.location);
    let extension_dir = manifest_path.parent();
    let extension_id = extension_dir
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut permissions = string_list(doc.get("permissions"));
    permissions.extend(string_list(doc.get("host_permissions")));
    // MV2 content scripts grant host access too
    if let Some(scripts) = doc.get("content_scripts").and_then(Value::as_array) {
        for script in scripts {
            permissions.extend(string_list(script.get("matches")));
        }
    }
    permissions.sort();
    permissions.dedup();

    let display_name = if name.starts_with("__MSG_") && !extension_id.is_empty() {
        extension_id.clone()
    } else {
        name.to_string()
    };

    let mut artifact = hint
        .artifact(MechanismKind::BrowserExtension, display_name)
        .with_meta("browser", browser)
        .with_meta("extension_id", extension_id.as_str())
        .with_meta("permissions", permissions.join(","));
    if let Some(dir) = extension_dir {
        artifact = artifact.with_path(dir);
    }
    if let Some(version) = doc.get("version").and_then(Value::as_str) {
        artifact = artifact.with_meta("version", version);
    }
    if let Some(update_url) = doc.get("update_url").and_then(Value::as_str) {
        artifact = artifact.with_meta("update_url", update_url);
    }
    if let Some(mv) = doc.get("manifest_version").and_then(Value::as_u64) {
        artifact = artifact.with_meta("manifest_version", mv.to_string());
    }

    vec![artifact]
}

#[derive(Debug, Deserialize)]
struct FirefoxExtensions {
    #[serde(default)]
    addons: Vec<FirefoxAddon>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirefoxAddon {
    id: String,
    #[serde(default, rename = "type")]
    addon_type: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    default_locale: Option<FirefoxLocale>,
    #[serde(default)]
    user_permissions: Option<FirefoxPermissions>,
}

#[derive(Debug, Deserialize)]
struct FirefoxLocale {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FirefoxPermissions {
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    origins: Vec<String>,
}

/// Firefox locations that ship with the browser itself.
const FIREFOX_BUILTIN_LOCATIONS: &[&str] = &["app-builtin", "app-system-defaults", "app-system-addons"];

/// Every extension in a Firefox profile's `extensions.json`. Themes,
/// dictionaries and locales are skipped.
pub fn parse_firefox(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let doc: FirefoxExtensions = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("unreadable extensions.json {}: {}", hint.location, e);
            return Vec::new();
        }
    };

    doc.addons
        .into_iter()
        .filter(|addon| addon.addon_type.as_deref().unwrap_or("extension") == "extension")
        .map(|addon| {
            let name = addon
                .default_locale
                .as_ref()
                .and_then(|l| l.name.clone())
                .unwrap_or_else(|| addon.id.clone());
            let perms = addon.user_permissions.unwrap_or_default();
            let mut permissions: Vec<String> =
                perms.permissions.into_iter().chain(perms.origins).collect();
            permissions.sort();
            permissions.dedup();

            let location = addon.location.unwrap_or_default();
            let builtin = FIREFOX_BUILTIN_LOCATIONS.contains(&location.as_str());

            let mut artifact = hint
                .artifact(MechanismKind::BrowserExtension, name)
                .with_meta("browser", "firefox")
                .with_meta("extension_id", addon.id.as_str())
                .with_meta("permissions", permissions.join(","))
                .with_meta("install_location", location.as_str())
                .with_meta("builtin", builtin.to_string())
                .with_meta("enabled", addon.active.to_string());
            if let Some(path) = addon.path {
                artifact = artifact.with_path(path);
            }
            if let Some(version) = addon.version {
                artifact = artifact.with_meta("version", version);
            }
            artifact
        })
        .collect()
}
