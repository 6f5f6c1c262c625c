//! Scan orchestration.
//!
//! The [`Engine`] owns the probe registry, the command gateway, the
//! signature oracle and the threat-intel snapshot. A scan runs every probe in
//! sequence, scores each artifact as it arrives (pass 1), inspects the ones
//! that qualify, then applies the post-hash rules (pass 2).

pub mod progress;

pub use progress::{ConsoleProgressReporter, NoProgress, ProgressEvent, ProgressSink, ScanPhase};

use crate::classifier;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{
    Artifact, MechanismKind, Platform, ScanError, ScanErrorKind, ScanResult, ScanStatus,
};
use crate::gateway::{CommandGateway, SystemGateway};
use crate::intel::{self, ImportSummary, ThreatIntelStore, ThreatIntelUpdate};
use crate::probes::{self, Probe, ProbeContext, ProbeError};
use crate::signature::{Inspection, SignatureOracle, SystemOracle};
use crate::utils::cancel::CancellationToken;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Error source used for orchestrator-level failures.
pub const ORCHESTRATOR: &str = "orchestrator";

/// Where the engine is in a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// Running probe `index` (zero-based) of `total`
    RunningProbes { index: usize, total: usize },
    Hashing,
    Classifying,
    Completed,
    Failed,
    Cancelled,
}

impl EngineState {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            EngineState::RunningProbes { .. } | EngineState::Hashing | EngineState::Classifying
        )
    }
}

type DedupKey = (MechanismKind, String, String, Option<PathBuf>, Option<String>);

fn owned_key(artifact: &Artifact) -> DedupKey {
    let (kind, location, name, path, command) = artifact.dedup_key();
    (
        kind,
        location.to_string(),
        name.to_string(),
        path.cloned(),
        command.map(str::to_string),
    )
}

/// Builder for [`Engine`]. Everything not set falls back to the real system.
pub struct EngineBuilder {
    config: Config,
    platform: Option<Platform>,
    gateway: Option<Arc<dyn CommandGateway>>,
    oracle: Option<Arc<dyn SignatureOracle>>,
    probes: Option<Vec<Box<dyn Probe>>>,
    intel: Option<ThreatIntelStore>,
    root: Option<PathBuf>,
    home_dirs: Option<Vec<PathBuf>>,
    cancel: CancellationToken,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            platform: None,
            gateway: None,
            oracle: None,
            probes: None,
            intel: None,
            root: None,
            home_dirs: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn CommandGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn SignatureOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Replace the platform's registered probes.
    pub fn probes(mut self, probes: Vec<Box<dyn Probe>>) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Start from this intel store instead of the configured file.
    pub fn intel(mut self, store: ThreatIntelStore) -> Self {
        self.intel = Some(store);
        self
    }

    /// Read the filesystem under `root` (for offline images and tests).
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn home_dirs(mut self, homes: Vec<PathBuf>) -> Self {
        self.home_dirs = Some(homes);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let platform = self.platform.unwrap_or_else(Platform::current);
        let gateway: Arc<dyn CommandGateway> = match self.gateway {
            Some(g) => g,
            None => Arc::new(SystemGateway::with_cancel(self.cancel.clone())),
        };
        let oracle: Arc<dyn SignatureOracle> = match self.oracle {
            Some(o) => o,
            None => Arc::new(SystemOracle::new(
                gateway.clone(),
                platform,
                self.config.scan.command_timeout(),
                self.config.hashing.max_file_size_bytes(),
            )),
        };
        let probes = match self.probes {
            Some(p) => p,
            None => probes::registry_for(platform, &self.config),
        };
        let intel = match self.intel {
            Some(store) => store,
            None => intel::load_store(&self.config.intel.intel_file())?,
        };

        log::debug!(
            "Engine ready: platform={}, {} probe(s)",
            platform.as_str(),
            probes.len()
        );

        Ok(Engine {
            config: self.config,
            platform,
            probes,
            gateway,
            oracle,
            intel: RwLock::new(Arc::new(intel)),
            state: RwLock::new(EngineState::Idle),
            scan_lock: Mutex::new(()),
            cancel: self.cancel,
            root: self.root,
            home_dirs: self.home_dirs,
        })
    }
}

/// Persistence scanner.
pub struct Engine {
    config: Config,
    platform: Platform,
    probes: Vec<Box<dyn Probe>>,
    gateway: Arc<dyn CommandGateway>,
    oracle: Arc<dyn SignatureOracle>,
    intel: RwLock<Arc<ThreatIntelStore>>,
    state: RwLock<EngineState>,
    scan_lock: Mutex<()>,
    cancel: CancellationToken,
    root: Option<PathBuf>,
    home_dirs: Option<Vec<PathBuf>>,
}

/// Accumulates one scan's items and errors.
struct ScanRun {
    items: Vec<Artifact>,
    errors: Vec<ScanError>,
    seen: HashSet<DedupKey>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine for the current machine with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn probe_names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    fn set_state(&self, state: EngineState) {
        log::trace!("engine state: {:?}", state);
        *self.state.write() = state;
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask a running scan to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current threat-intel snapshot.
    pub fn intel(&self) -> Arc<ThreatIntelStore> {
        self.intel.read().clone()
    }

    /// Merge new indicators into the store. A scan already running keeps the
    /// snapshot it started with.
    pub fn import_threat_intel(&self, update: &ThreatIntelUpdate) -> ImportSummary {
        let mut guard = self.intel.write();
        let (merged, summary) = guard.merged(update);
        *guard = Arc::new(merged);
        log::info!(
            "Imported threat intel: +{} hashes, +{} domains, +{} publishers",
            summary.hashes_added,
            summary.domains_added,
            summary.publishers_added
        );
        summary
    }

    fn context(&self) -> ProbeContext {
        let mut ctx = ProbeContext::new(self.platform, self.gateway.clone(), self.config.scan.command_timeout())
            .with_cancel(self.cancel.clone());
        if let Some(ref root) = self.root {
            ctx = ctx.with_root(root.clone());
        }
        if let Some(ref homes) = self.home_dirs {
            ctx = ctx.with_home_dirs(homes.clone());
        }
        ctx.with_extra_home_dirs(&self.config.scan.extra_home_dirs)
    }

    /// Run a scan without progress reporting.
    pub fn scan(&self) -> ScanResult {
        self.run_scan(&NoProgress)
    }

    /// Run one full scan. Scans on the same engine are serialized.
    pub fn run_scan(&self, sink: &dyn ProgressSink) -> ScanResult {
        let _guard = self.scan_lock.lock();
        let result = self.scan_locked(sink);
        self.cancel.reset();
        result
    }

    fn scan_locked(&self, sink: &dyn ProgressSink) -> ScanResult {
        let scan_id = uuid::Uuid::new_v4().to_string();
        let start_time = Utc::now();
        log::info!("Starting scan {} on {}", scan_id, self.platform);

        let precondition = if !self.platform.is_supported() {
            Some(ScanError::new(
                ORCHESTRATOR,
                ScanErrorKind::UnsupportedPlatform,
                format!("platform {} is not supported", self.platform.as_str()),
            ))
        } else if self.probes.is_empty() {
            Some(ScanError::new(ORCHESTRATOR, ScanErrorKind::NoProbes, "no probes registered"))
        } else {
            None
        };
        if let Some(error) = precondition {
            log::error!("Scan {} failed: {}", scan_id, error.message);
            self.set_state(EngineState::Failed);
            return ScanResult {
                scan_id,
                platform: self.platform,
                status: ScanStatus::Failed,
                start_time,
                end_time: Utc::now(),
                items: Vec::new(),
                errors: vec![error],
            };
        }

        let intel = self.intel();
        let ctx = self.context();
        let total = self.probes.len();
        let steps = (total + 2) as f64;
        let mut run = ScanRun {
            items: Vec::new(),
            errors: Vec::new(),
            seen: HashSet::new(),
        };

        let mut cancelled = false;
        for (index, probe) in self.probes.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.set_state(EngineState::RunningProbes { index, total });
            log::debug!("Running probe {} ({}/{})", probe.name(), index + 1, total);

            let mut found = Vec::new();
            match probe.scan(&ctx, &mut found) {
                Ok(()) => {}
                Err(ProbeError::Cancelled) => cancelled = true,
                Err(e) => {
                    log::warn!("Probe {} failed: {}", probe.name(), e);
                    run.errors.push(e.to_scan_error(probe.name()));
                }
            }
            let admitted = self.admit(probe.name(), found, &intel, &mut run);
            log::debug!("Probe {} produced {} item(s)", probe.name(), admitted);

            sink.report(&ProgressEvent {
                phase: ScanPhase::Probe(probe.name()),
                fraction: (index + 1) as f64 / steps,
                items_found: run.items.len(),
            });
            if cancelled {
                break;
            }
        }

        if cancelled || self.cancel.is_cancelled() {
            return self.finish_cancelled(scan_id, start_time, run);
        }

        self.set_state(EngineState::Hashing);
        let inspections = self.inspect_qualifying(&ctx, &run.items);
        sink.report(&ProgressEvent {
            phase: ScanPhase::Hashing,
            fraction: (total + 1) as f64 / steps,
            items_found: run.items.len(),
        });

        self.set_state(EngineState::Classifying);
        for (index, inspection) in &inspections {
            classifier::pass_two(&mut run.items[*index], inspection, &intel);
        }

        let result = ScanResult {
            scan_id,
            platform: self.platform,
            status: ScanStatus::Completed,
            start_time,
            end_time: Utc::now(),
            items: run.items,
            errors: run.errors,
        };
        self.set_state(EngineState::Completed);
        sink.report(&ProgressEvent {
            phase: ScanPhase::Completed,
            fraction: 1.0,
            items_found: result.items.len(),
        });

        let counts = result.counts_by_risk();
        log::info!(
            "Scan {} complete: {} item(s), {} inspected, {} probe error(s), risk counts {:?}",
            result.scan_id,
            result.total_items(),
            inspections.len(),
            result.errors.len(),
            counts
        );
        result
    }

    /// Apply pass 1, drop exact duplicates and assign ids. Returns how many
    /// artifacts were kept.
    fn admit(
        &self,
        probe: &str,
        found: Vec<Artifact>,
        intel: &ThreatIntelStore,
        run: &mut ScanRun,
    ) -> usize {
        let mut kept = 0;
        for mut artifact in found {
            if !run.seen.insert(owned_key(&artifact)) {
                log::trace!("dropping duplicate {} from {}", artifact.name, probe);
                continue;
            }
            kept += 1;
            artifact.id = format!("{}-{}", probe, kept);
            classifier::pass_one(&mut artifact, intel);
            run.items.push(artifact);
        }
        kept
    }

    /// Inspect every qualifying item's file, spread over `hashing.threads`
    /// scoped threads. Returns `(item index, inspection)` pairs in item order.
    fn inspect_qualifying(&self, ctx: &ProbeContext, items: &[Artifact]) -> Vec<(usize, Inspection)> {
        let min_risk = self.config.hashing.min_risk;
        let jobs: Vec<(usize, PathBuf)> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| classifier::qualifies_for_inspection(item, min_risk))
            .filter_map(|(index, item)| item.raw_path().map(|p| (index, ctx.resolve(&p))))
            .collect();
        if jobs.is_empty() {
            return Vec::new();
        }

        let threads = self.config.hashing.threads.max(1).min(jobs.len());
        let chunk_size = jobs.len().div_ceil(threads);
        log::debug!("Inspecting {} file(s) on {} thread(s)", jobs.len(), threads);

        let oracle = self.oracle.as_ref();
        let mut results: Vec<(usize, Inspection)> = std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(index, path)| (*index, oracle.inspect(path)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(part) => part,
                    Err(_) => {
                        log::error!("inspection worker panicked");
                        Vec::new()
                    }
                })
                .collect()
        });
        results.sort_by_key(|(index, _)| *index);
        results
    }

    fn finish_cancelled(
        &self,
        scan_id: String,
        start_time: chrono::DateTime<Utc>,
        mut run: ScanRun,
    ) -> ScanResult {
        log::warn!("Scan {} cancelled with {} item(s) collected", scan_id, run.items.len());
        run.errors
            .push(ScanError::new(ORCHESTRATOR, ScanErrorKind::Cancelled, "scan cancelled"));
        self.set_state(EngineState::Cancelled);
        ScanResult {
            scan_id,
            platform: self.platform,
            status: ScanStatus::Cancelled,
            start_time,
            end_time: Utc::now(),
            items: run.items,
            errors: run.errors,
        }
    }
}
