//! Windows Authenticode via `Get-AuthenticodeSignature`.

use crate::core::types::SigningTier;
use serde_json::Value;
use std::path::Path;

/// Quote `path` as a PowerShell single-quoted literal. Inside such a
/// literal only `'` is special, and it is escaped by doubling.
pub fn ps_literal(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

/// Argument vector for inspecting `path`.
pub fn command(path: &Path) -> Vec<String> {
    let script = format!(
        "Get-AuthenticodeSignature -LiteralPath {} | Select-Object \
         @{{n='Status';e={{$_.Status.ToString()}}}}, \
         @{{n='Subject';e={{$_.SignerCertificate.Subject}}}} | ConvertTo-Json -Compress",
        ps_literal(path)
    );
    vec![
        "powershell".to_string(),
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-Command".to_string(),
        script,
    ]
}

/// Extract CN (Common Name) from a certificate subject.
pub fn extract_cn(subject: &str) -> String {
    for part in subject.split(',') {
        let part = part.trim();
        if let Some(cn) = part.strip_prefix("CN=") {
            return cn.trim_matches('"').to_string();
        }
    }
    subject.to_string()
}

/// `SignatureStatus` numeric values, for hosts that serialize the enum raw.
fn status_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            let name = match n.as_u64()? {
                0 => "Valid",
                1 => "UnknownError",
                2 => "NotSigned",
                3 => "HashMismatch",
                4 => "NotTrusted",
                5 => "NotSupportedFileFormat",
                6 => "Incompatible",
                _ => return None,
            };
            Some(name.to_string())
        }
        _ => None,
    }
}

/// Map the JSON result to a tier and signer common name.
pub fn parse(stdout: &str) -> (SigningTier, Option<String>) {
    let parsed: Value = match serde_json::from_str(stdout.trim()) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("Unparseable Authenticode output: {}", e);
            return (SigningTier::Unknown, None);
        }
    };

    let status = parsed.get("Status").and_then(status_name).unwrap_or_default();
    let signer = parsed
        .get("Subject")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(extract_cn);

    match status.as_str() {
        "Valid" => {
            let microsoft = signer
                .as_deref()
                .is_some_and(|cn| cn.to_lowercase().starts_with("microsoft"));
            if microsoft {
                (SigningTier::PlatformTrusted, signer)
            } else {
                (SigningTier::ThirdPartyTrusted, signer)
            }
        }
        "NotSigned" => (SigningTier::Unsigned, None),
        "HashMismatch" | "NotTrusted" => (SigningTier::Invalid, signer),
        _ => (SigningTier::Unknown, signer),
    }
}
