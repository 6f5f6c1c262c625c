//! Signature & hash oracle.
//!
//! Given the executable an artifact resolves to, reports who signed it and
//! what it hashes to. Failures never propagate: the affected fields stay
//! absent and the tier stays [`SigningTier::Unknown`].

pub mod authenticode;
pub mod codesign;
pub mod package;

use crate::core::types::{Platform, SigningTier};
use crate::gateway::CommandGateway;
use crate::utils::hash::HashCalculator;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What the oracle learned about one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    pub signing_tier: SigningTier,
    /// Signer common name, Apple authority, or owning package
    pub authority: Option<String>,
    pub sha256: Option<String>,
    pub md5: Option<String>,
}

/// Inspects executables referenced by artifacts.
pub trait SignatureOracle: Send + Sync {
    fn inspect(&self, path: &Path) -> Inspection;
}

const CACHE_MAX_SIZE: usize = 1000;

/// Oracle that calls the platform signing tool through the gateway.
pub struct SystemOracle {
    gateway: Arc<dyn CommandGateway>,
    platform: Platform,
    timeout: Duration,
    max_file_size: u64,
    cache: RwLock<HashMap<PathBuf, Inspection>>,
}

impl SystemOracle {
    pub fn new(
        gateway: Arc<dyn CommandGateway>,
        platform: Platform,
        timeout: Duration,
        max_file_size: u64,
    ) -> Self {
        Self {
            gateway,
            platform,
            timeout,
            max_file_size,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn run_tool(&self, argv: &[String]) -> Option<crate::gateway::CommandOutput> {
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        match self.gateway.run(&argv, self.timeout) {
            Ok(out) => Some(out),
            Err(e) => {
                log::debug!("signature tool failed: {}", e);
                None
            }
        }
    }

    fn signature(&self, path: &Path) -> (SigningTier, Option<String>) {
        match self.platform {
            Platform::Windows => match self.run_tool(&authenticode::command(path)) {
                Some(out) if out.is_success() => authenticode::parse(&out.stdout),
                _ => (SigningTier::Unknown, None),
            },
            // codesign exits non-zero for unsigned code; the reason is on stderr
            Platform::Macos => match self.run_tool(&codesign::command(path)) {
                Some(out) => codesign::parse(&out.stderr),
                None => (SigningTier::Unknown, None),
            },
            Platform::Linux => package::inspect(self.gateway.as_ref(), path, self.timeout),
            Platform::Android | Platform::Unsupported => (SigningTier::Unknown, None),
        }
    }

    fn inspect_uncached(&self, path: &Path) -> Inspection {
        let mut inspection = Inspection::default();

        match HashCalculator::hash_file_limited(path, self.max_file_size) {
            Ok(hashes) => {
                inspection.sha256 = Some(hashes.sha256);
                inspection.md5 = Some(hashes.md5);
            }
            Err(e) => log::debug!("Not hashing {:?}: {}", path, e),
        }

        // Nothing to verify if the file is not there.
        if path.exists() {
            let (tier, authority) = self.signature(path);
            inspection.signing_tier = tier;
            inspection.authority = authority;
        }

        inspection
    }

    pub fn cache_size(&self) -> usize {
        self.cache.read().len()
    }
}

impl SignatureOracle for SystemOracle {
    fn inspect(&self, path: &Path) -> Inspection {
        if let Some(cached) = self.cache.read().get(path) {
            return cached.clone();
        }

        let inspection = self.inspect_uncached(path);

        let mut cache = self.cache.write();
        if cache.len() >= CACHE_MAX_SIZE {
            let keys: Vec<_> = cache.keys().take(CACHE_MAX_SIZE / 2).cloned().collect();
            for key in keys {
                cache.remove(&key);
            }
        }
        cache.insert(path.to_path_buf(), inspection.clone());

        inspection
    }
}

/// Oracle that only hashes. Used where no signing tool exists.
#[derive(Debug, Clone)]
pub struct HashOnlyOracle {
    max_file_size: u64,
}

impl HashOnlyOracle {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl SignatureOracle for HashOnlyOracle {
    fn inspect(&self, path: &Path) -> Inspection {
        match HashCalculator::hash_file_limited(path, self.max_file_size) {
            Ok(hashes) => Inspection {
                sha256: Some(hashes.sha256),
                md5: Some(hashes.md5),
                ..Inspection::default()
            },
            Err(e) => {
                log::debug!("Not hashing {:?}: {}", path, e);
                Inspection::default()
            }
        }
    }
}
