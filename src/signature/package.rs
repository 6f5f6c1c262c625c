//! Linux package ownership (`dpkg-query -S`, `rpm -qf`).
//!
//! Linux has no ubiquitous code signing; a file shipped by the distro
//! package manager stands in for a platform signature.

use crate::core::types::SigningTier;
use crate::gateway::{CommandGateway, GatewayError};
use std::path::Path;
use std::time::Duration;

/// Outcome of asking one package manager about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    Owned(String),
    NotOwned,
    /// Tool not installed, or it failed in a way that says nothing
    NoAnswer,
}

/// `dpkg-query -S` prints `package[, package...]: /path`.
pub fn parse_dpkg(stdout: &str) -> Option<String> {
    let line = stdout.lines().find(|l| !l.starts_with("diversion by"))?;
    let (packages, _) = line.split_once(": ")?;
    let first = packages.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// `rpm -qf` prints the owning package NEVRA.
pub fn parse_rpm(stdout: &str) -> Option<String> {
    let line = stdout.lines().next()?.trim();
    if line.is_empty() || line.contains("not owned") {
        None
    } else {
        Some(line.to_string())
    }
}

fn ask(
    gateway: &dyn CommandGateway,
    argv: &[&str],
    timeout: Duration,
    parse: fn(&str) -> Option<String>,
) -> Ownership {
    match gateway.run(argv, timeout) {
        Ok(out) if out.is_success() => match parse(&out.stdout) {
            Some(pkg) => Ownership::Owned(pkg),
            None => Ownership::NotOwned,
        },
        Ok(_) => Ownership::NotOwned,
        Err(GatewayError::ToolMissing(_)) => Ownership::NoAnswer,
        Err(e) => {
            log::debug!("{} failed: {}", argv[0], e);
            Ownership::NoAnswer
        }
    }
}

/// Ask dpkg, then rpm. Owned wins; a definite "not owned" beats no answer.
pub fn inspect(
    gateway: &dyn CommandGateway,
    path: &Path,
    timeout: Duration,
) -> (SigningTier, Option<String>) {
    let path = path.to_string_lossy().into_owned();
    let dpkg = ask(gateway, &["dpkg-query", "-S", path.as_str()], timeout, parse_dpkg);
    if let Ownership::Owned(ref pkg) = dpkg {
        return (SigningTier::PlatformTrusted, Some(pkg.clone()));
    }
    let rpm = ask(gateway, &["rpm", "-qf", path.as_str()], timeout, parse_rpm);
    match (dpkg, rpm) {
        (_, Ownership::Owned(pkg)) => (SigningTier::PlatformTrusted, Some(pkg)),
        (Ownership::NotOwned, _) | (_, Ownership::NotOwned) => (SigningTier::Unsigned, None),
        _ => (SigningTier::Unknown, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CommandOutput, ScriptedGateway};

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn test_parse_dpkg() {
        assert_eq!(parse_dpkg("coreutils: /usr/bin/ls\n"), Some("coreutils".into()));
        assert_eq!(
            parse_dpkg("libc6:amd64, libc6:i386: /lib/x\n"),
            Some("libc6:amd64".into())
        );
        assert_eq!(parse_dpkg(""), None);
    }

    #[test]
    fn test_parse_rpm() {
        assert_eq!(parse_rpm("bash-5.1.8-6.el9.x86_64\n"), Some("bash-5.1.8-6.el9.x86_64".into()));
        assert_eq!(parse_rpm("file /opt/x is not owned by any package\n"), None);
    }

    #[test]
    fn test_dpkg_owned() {
        let gw = ScriptedGateway::new().on(&["dpkg-query", "-S", "/usr/bin/ls"], "coreutils: /usr/bin/ls\n");
        assert_eq!(
            inspect(&gw, Path::new("/usr/bin/ls"), T),
            (SigningTier::PlatformTrusted, Some("coreutils".into()))
        );
        assert_eq!(gw.call_count("rpm"), 0);
    }

    #[test]
    fn test_not_owned_is_unsigned() {
        let gw = ScriptedGateway::new().on_output(
            &["dpkg-query", "-S", "/opt/x"],
            CommandOutput::failure(1, "dpkg-query: no path found matching pattern /opt/x"),
        );
        assert_eq!(inspect(&gw, Path::new("/opt/x"), T).0, SigningTier::Unsigned);
    }

    #[test]
    fn test_rpm_fallback_and_no_tools() {
        let gw = ScriptedGateway::new().on(&["rpm", "-qf", "/usr/bin/bash"], "bash-5.1\n");
        assert_eq!(
            inspect(&gw, Path::new("/usr/bin/bash"), T).0,
            SigningTier::PlatformTrusted
        );

        let none = ScriptedGateway::new();
        assert_eq!(inspect(&none, Path::new("/x"), T).0, SigningTier::Unknown);
    }
}
