//! OpenSSH `authorized_keys` files.

use super::SourceHint;
use crate::core::types::{Artifact, MechanismKind};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};

/// `ssh-keygen -l` style fingerprint of a base64 key blob.
fn fingerprint(blob: &str) -> Option<String> {
    let decoded = STANDARD.decode(blob).ok()?;
    Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&decoded))))
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-")
        || token.starts_with("ecdsa-sha2-")
        || token.starts_with("sk-ssh-")
        || token.starts_with("sk-ecdsa-")
}

/// Split on whitespace outside double quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in line.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Split the options field on commas outside quotes.
fn split_options(options: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in options.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// One artifact per key. A `command="..."` option becomes the artifact command.
pub fn parse_authorized_keys(raw: &str, hint: &SourceHint) -> Vec<Artifact> {
    let mut artifacts = Vec::new();

    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens = tokenize(line);
        let (options, rest) = match tokens.first() {
            Some(first) if is_key_type(first) => (None, &tokens[..]),
            Some(first) => (Some(first.as_str()), &tokens[1..]),
            None => continue,
        };
        let (Some(key_type), Some(blob)) = (rest.first(), rest.get(1)) else {
            continue;
        };
        if !is_key_type(key_type) {
            continue;
        }
        let comment = rest[2..].join(" ");

        let fingerprint = fingerprint(blob);
        let name = match (&fingerprint, comment.is_empty()) {
            (_, false) => comment.clone(),
            (Some(fp), true) => fp.clone(),
            (None, true) => format!("{} key", key_type),
        };

        let mut artifact = hint
            .artifact(MechanismKind::SshAuthorizedKey, name)
            .with_meta("key_type", key_type.as_str())
            .with_meta("line", (lineno + 1).to_string());
        if let Some(fp) = fingerprint {
            artifact = artifact.with_meta("fingerprint", fp);
        }
        if !comment.is_empty() {
            artifact = artifact.with_meta("comment", comment.as_str());
        }

        if let Some(options) = options {
            artifact = artifact.with_meta("options", options);
            for option in split_options(options) {
                if let Some(command) = option.strip_prefix("command=") {
                    artifact = artifact.with_command(command);
                }
                if let Some(from) = option.strip_prefix("from=") {
                    artifact = artifact.with_meta("from", from);
                }
            }
        }

        artifacts.push(artifact);
    }

    artifacts
}
