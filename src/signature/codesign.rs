//! macOS `codesign -dv --verbose=2` (details are printed on stderr).

use crate::core::types::SigningTier;
use std::path::Path;

pub fn command(path: &Path) -> Vec<String> {
    vec![
        "codesign".to_string(),
        "-dv".to_string(),
        "--verbose=2".to_string(),
        path.to_string_lossy().into_owned(),
    ]
}

/// Map codesign output to a tier and leaf authority.
pub fn parse(stderr: &str) -> (SigningTier, Option<String>) {
    let lower = stderr.to_lowercase();
    if lower.contains("not signed at all") {
        return (SigningTier::Unsigned, None);
    }
    if lower.contains("invalid signature") || lower.contains("code object is not valid") {
        return (SigningTier::Invalid, None);
    }

    let authorities: Vec<&str> = stderr
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Authority="))
        .collect();

    let Some(leaf) = authorities.first() else {
        // Ad-hoc signatures carry no authority chain and prove nothing.
        if stderr.contains("Signature=adhoc") {
            return (SigningTier::Unsigned, None);
        }
        return (SigningTier::Unknown, None);
    };

    if let Some(developer) = leaf.strip_prefix("Developer ID Application: ") {
        return (SigningTier::ThirdPartyTrusted, Some(developer.to_string()));
    }
    // Apple's own binaries: Software Signing -> Apple Code Signing CA -> Apple Root CA
    let apple_chain = authorities.iter().any(|a| a.starts_with("Apple Root CA"));
    if apple_chain && (*leaf == "Software Signing" || leaf.starts_with("Apple ")) {
        return (SigningTier::PlatformTrusted, Some(leaf.to_string()));
    }
    if apple_chain {
        // App Store / Mac Installer distribution certificates chain to Apple too
        return (SigningTier::ThirdPartyTrusted, Some(leaf.to_string()));
    }
    (SigningTier::Invalid, Some(leaf.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apple_platform_binary() {
        let stderr = "Executable=/bin/ls\nIdentifier=com.apple.ls\nFormat=Mach-O universal\nAuthority=Software Signing\nAuthority=Apple Code Signing Certification Authority\nAuthority=Apple Root CA\n";
        assert_eq!(
            parse(stderr),
            (SigningTier::PlatformTrusted, Some("Software Signing".into()))
        );
    }

    #[test]
    fn test_developer_id() {
        let stderr = "Authority=Developer ID Application: Acme Inc (ABCDE12345)\nAuthority=Developer ID Certification Authority\nAuthority=Apple Root CA\n";
        assert_eq!(
            parse(stderr),
            (
                SigningTier::ThirdPartyTrusted,
                Some("Acme Inc (ABCDE12345)".into())
            )
        );
    }

    #[test]
    fn test_unsigned_and_adhoc() {
        assert_eq!(
            parse("/tmp/x: code object is not signed at all\n").0,
            SigningTier::Unsigned
        );
        assert_eq!(
            parse("Executable=/tmp/x\nSignature=adhoc\n").0,
            SigningTier::Unsigned
        );
    }

    #[test]
    fn test_invalid_and_unknown() {
        assert_eq!(parse("/x: invalid signature (code or signature have been modified)").0, SigningTier::Invalid);
        assert_eq!(parse("").0, SigningTier::Unknown);
        assert_eq!(parse("Authority=Self Signed Thing\n").0, SigningTier::Invalid);
    }
}
