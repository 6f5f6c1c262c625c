//! `reg query` output.
//!
//! The utility prints one block per key: the full key path on its own line,
//! followed by indented `name    TYPE    data` rows separated by runs of
//! four spaces. `REG_MULTI_SZ` data joins its elements with a literal `\0`.

use super::{base_name, split_command_line, SourceHint};
use crate::core::types::{Artifact, MechanismKind};
use once_cell::sync::Lazy;
use regex::Regex;

static VALUE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+(.*?)\s{2,}(REG_[A-Z0-9_]+)(?:\s{2,}(.*))?$").unwrap());

/// Family of registry locations, which decides how values map to artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrySection {
    /// Run / RunOnce / Policies\Explorer\Run and friends
    RunKeys,
    /// `Services /s /v ImagePath`
    Services,
    /// Session Manager `BootExecute`
    BootExecute,
    /// `Control\Lsa` package lists
    LsaPackages,
    /// `Winlogon` Shell / Userinit / Taskman
    Winlogon,
    /// `Image File Execution Options /s /v Debugger`
    ImageHijack,
    /// `Windows NT\CurrentVersion\Windows` AppInit_DLLs
    AppInitDlls,
}

/// One registry value row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegValue {
    pub name: String,
    pub value_type: String,
    pub data: String,
}

impl RegValue {
    /// Elements of a `REG_MULTI_SZ`, or the data itself for other types.
    pub fn elements(&self) -> Vec<&str> {
        if self.value_type == "REG_MULTI_SZ" {
            self.data
                .split("\\0")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect()
        } else if self.data.trim().is_empty() {
            Vec::new()
        } else {
            vec![self.data.trim()]
        }
    }
}

/// One key and its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegKeyBlock {
    pub key: String,
    pub values: Vec<RegValue>,
}

impl RegKeyBlock {
    pub fn value(&self, name: &str) -> Option<&RegValue> {
        self.values.iter().find(|v| v.name.eq_ignore_ascii_case(name))
    }

    /// Last path component of the key.
    pub fn leaf(&self) -> &str {
        base_name(&self.key)
    }
}

/// Split `reg query` output into key blocks. Blocks with no values are kept.
pub fn parse_blocks(raw: &str) -> Vec<RegKeyBlock> {
    let mut blocks: Vec<RegKeyBlock> = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with("HKEY_") || line.starts_with("HKLM") || line.starts_with("HKCU") {
            blocks.push(RegKeyBlock {
                key: line.trim().to_string(),
                values: Vec::new(),
            });
            continue;
        }

        let Some(caps) = VALUE_LINE.captures(line) else {
            continue;
        };
        let Some(block) = blocks.last_mut() else {
            continue;
        };

        let name = caps.get(1).map_or("", |m| m.as_str()).trim();
        block.values.push(RegValue {
            name: if name.is_empty() {
                "(Default)".to_string()
            } else {
                name.to_string()
            },
            value_type: caps.get(2).map_or("", |m| m.as_str()).to_string(),
            data: caps.get(3).map_or("", |m| m.as_str()).trim().to_string(),
        });
    }

    blocks
}

/// Whether `reg query` output/stderr reports a key that does not exist.
pub fn is_missing_key(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("unable to find") || lower.contains("cannot find")
}

/// Map `reg query` output to artifacts for one section.
pub fn parse(raw: &str, section: RegistrySection, hint: &SourceHint) -> Vec<Artifact> {
    let blocks = parse_blocks(raw);
    let mut artifacts = Vec::new();
    for block in &blocks {
        match section {
            RegistrySection::RunKeys => run_key_values(block, hint, &mut artifacts),
            RegistrySection::Services => service_images(block, hint, &mut artifacts),
            RegistrySection::BootExecute => boot_execute(block, hint, &mut artifacts),
            RegistrySection::LsaPackages => lsa_packages(block, hint, &mut artifacts),
            RegistrySection::Winlogon => winlogon(block, hint, &mut artifacts),
            RegistrySection::ImageHijack => ifeo_debuggers(block, hint, &mut artifacts),
            RegistrySection::AppInitDlls => appinit(block, hint, &mut artifacts),
        }
    }
    artifacts
}

/// Artifact located at `block.key`, with the command split into a path.
fn command_artifact(
    hint: &SourceHint,
    block: &RegKeyBlock,
    kind: MechanismKind,
    name: &str,
    value: &RegValue,
    command: &str,
) -> Artifact {
    let mut artifact = hint
        .artifact(kind, name)
        .with_command(command)
        .with_meta("value_name", value.name.as_str())
        .with_meta("value_type", value.value_type.as_str())
        .with_meta("value", value.data.as_str());
    artifact.location = block.key.clone();
    if let (Some(path), _) = split_command_line(command) {
        artifact = artifact.with_path(path);
    }
    artifact
}

fn run_key_values(block: &RegKeyBlock, hint: &SourceHint, out: &mut Vec<Artifact>) {
    for value in &block.values {
        if value.data.is_empty() {
            continue;
        }
        out.push(command_artifact(
            hint,
            block,
            MechanismKind::AutostartRegistry,
            &value.name,
            value,
            &value.data,
        ));
    }
}

/// Drivers load from `.sys` images under `System32\drivers`.
fn is_driver_image(image: &str) -> bool {
    let lower = image.trim_matches('"').to_lowercase();
    lower.ends_with(".sys") || lower.contains("\\drivers\\")
}

fn service_images(block: &RegKeyBlock, hint: &SourceHint, out: &mut Vec<Artifact>) {
    let Some(value) = block.value("ImagePath") else {
        return;
    };
    if value.data.is_empty() {
        return;
    }

    let kind = if is_driver_image(&value.data) {
        MechanismKind::KernelModule
    } else {
        MechanismKind::Service
    };
    let name = block.leaf().to_string();
    let artifact = command_artifact(hint, block, kind, &name, value, &value.data)
        .with_meta("service_name", name.as_str());
    out.push(artifact);
}

/// Native image a BootExecute entry runs, e.g. `autocheck autochk *` -> autochk.
fn boot_execute_image(entry: &str) -> Option<String> {
    let mut tokens = entry.split_whitespace();
    let first = tokens.next()?;
    let program = if first.eq_ignore_ascii_case("autocheck") {
        tokens.next()?
    } else {
        first
    };
    if program.contains('\\') {
        return Some(program.to_string());
    }
    let file = if program.contains('.') {
        program.to_string()
    } else {
        format!("{}.exe", program)
    };
    Some(format!(r"C:\Windows\System32\{}", file))
}

fn boot_execute(block: &RegKeyBlock, hint: &SourceHint, out: &mut Vec<Artifact>) {
    let Some(value) = block.value("BootExecute") else {
        return;
    };
    for entry in value.elements() {
        let mut artifact = hint
            .artifact(MechanismKind::BootExecute, entry)
            .with_command(entry)
            .with_meta("value_name", "BootExecute")
            .with_meta("value", entry);
        artifact.location = block.key.clone();
        if let Some(image) = boot_execute_image(entry) {
            artifact = artifact.with_path(image);
        }
        out.push(artifact);
    }
}

const LSA_VALUES: &[&str] = &[
    "Authentication Packages",
    "Notification Packages",
    "Security Packages",
];

fn lsa_packages(block: &RegKeyBlock, hint: &SourceHint, out: &mut Vec<Artifact>) {
    for value_name in LSA_VALUES {
        let Some(value) = block.value(value_name) else {
            continue;
        };
        for package in value.elements() {
            let package = package.trim_matches('"');
            if package.is_empty() {
                continue;
            }
            let dll = if package.to_lowercase().ends_with(".dll") {
                package.to_string()
            } else {
                format!("{}.dll", package)
            };
            let mut artifact = hint
                .artifact(MechanismKind::SecurityPackage, package)
                .with_path(format!(r"C:\Windows\System32\{}", dll))
                .with_meta("value_name", *value_name)
                .with_meta("value", package);
            artifact.location = block.key.clone();
            out.push(artifact);
        }
    }
}

const WINLOGON_VALUES: &[&str] = &["Shell", "Userinit", "Taskman", "AppSetup"];

fn winlogon(block: &RegKeyBlock, hint: &SourceHint, out: &mut Vec<Artifact>) {
    for value_name in WINLOGON_VALUES {
        let Some(value) = block.value(value_name) else {
            continue;
        };
        if value.data.is_empty() {
            continue;
        }
        // Userinit is a comma list; the first entry is the executable.
        let first = value
            .data
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("");
        let mut artifact = hint
            .artifact(MechanismKind::WinlogonHelper, *value_name)
            .with_command(value.data.as_str())
            .with_meta("value_name", *value_name)
            .with_meta("value", value.data.as_str());
        artifact.location = block.key.clone();
        if let (Some(path), _) = split_command_line(first) {
            artifact = artifact.with_path(path);
        }
        out.push(artifact);
    }
}

fn ifeo_debuggers(block: &RegKeyBlock, hint: &SourceHint, out: &mut Vec<Artifact>) {
    let Some(value) = block.value("Debugger") else {
        return;
    };
    if value.data.is_empty() {
        return;
    }
    let target = block.leaf().to_string();
    let artifact = command_artifact(
        hint,
        block,
        MechanismKind::ImageHijack,
        &target,
        value,
        &value.data,
    )
    .with_meta("target_image", target.as_str());
    out.push(artifact);
}

fn appinit(block: &RegKeyBlock, hint: &SourceHint, out: &mut Vec<Artifact>) {
    let Some(value) = block.value("AppInit_DLLs") else {
        return;
    };
    let enabled = block
        .value("LoadAppInit_DLLs")
        .map(|v| v.data != "0x0")
        .unwrap_or(false);

    for dll in value
        .data
        .split([',', ';', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let mut artifact = hint
            .artifact(MechanismKind::PreloadLibrary, base_name(dll))
            .with_path(dll)
            .with_meta("value_name", "AppInit_DLLs")
            .with_meta("value", value.data.as_str())
            .with_meta("enabled", enabled.to_string());
        artifact.location = block.key.clone();
        out.push(artifact);
    }
}
