//! Scheduling loop: every catalog case against one candidate address.
//!
//! Each evaluated leaf is one sub-test: rollback, setup, call, bounded run,
//! verify. A run that times out or terminates abnormally fails its sub-test
//! without verify. After a timeout, the remaining cases for that address are
//! skipped when early quit is enabled.

use crate::error::{EngineError, MemoryFault, MemoryFaultKind, ProbeError, Result, SubtestError};
use crate::probe::binder::ArgumentBinder;
use crate::probe::case::{CaseScratch, SetupContext, TestCase, VerifyContext};
use crate::probe::snapshot::SnapshotController;
use crate::probe::tree::TestLeaf;
use crate::sandbox::abi::ConventionKind;
use crate::sandbox::layout::LayoutResolver;
use crate::sandbox::{ExecutionEngine, RunStatus};
use crate::utils::config::ProbeConfig;
use crate::utils::constants::SENTINEL_RETURN;
use crate::utils::det_rng::DetRng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Function names a candidate address behaved like.
pub type MatchSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    pub addresses: u64,
    pub cases_run: u64,
    pub subtests: u64,
    pub verify_calls: u64,
    pub timeouts: u64,
    pub faults: u64,
    pub setup_errors: u64,
    pub early_quits: u64,
    pub full_restores: u64,
    pub register_restores: u64,
}

impl CampaignStats {
    pub fn merge(&mut self, other: &CampaignStats) {
        self.addresses += other.addresses;
        self.cases_run += other.cases_run;
        self.subtests += other.subtests;
        self.verify_calls += other.verify_calls;
        self.timeouts += other.timeouts;
        self.faults += other.faults;
        self.setup_errors += other.setup_errors;
        self.early_quits += other.early_quits;
        self.full_restores += other.full_restores;
        self.register_restores += other.register_restores;
    }
}

fn serialize_hex_keys<S>(
    results: &BTreeMap<u64, MatchSet>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(results.len()))?;
    for (addr, matches) in results {
        map.serialize_entry(&format!("{addr:#x}"), matches)?;
    }
    map.end()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignReport {
    pub seed: u64,
    pub convention: ConventionKind,
    #[serde(serialize_with = "serialize_hex_keys")]
    pub results: BTreeMap<u64, MatchSet>,
    pub disabled_cases: Vec<String>,
    pub stats: CampaignStats,
    pub elapsed_ms: u128,
}

impl CampaignReport {
    pub fn new(seed: u64, convention: ConventionKind, disabled_cases: Vec<String>) -> Self {
        Self {
            seed,
            convention,
            results: BTreeMap::new(),
            disabled_cases,
            stats: CampaignStats::default(),
            elapsed_ms: 0,
        }
    }

    /// Fold a partial report over a disjoint address set into this one.
    pub fn merge(&mut self, other: CampaignReport) {
        self.results.extend(other.results);
        self.stats.merge(&other.stats);
    }

    pub fn matches_for(&self, address: u64) -> Option<&MatchSet> {
        self.results.get(&address)
    }
}

pub struct TestLauncher<E: ExecutionEngine> {
    engine: E,
    catalog: Arc<Vec<TestCase>>,
    enabled: Vec<bool>,
    layout: Option<Arc<dyn LayoutResolver>>,
    controller: SnapshotController,
    binder: ArgumentBinder,
    scratch: CaseScratch,
    timeout: Duration,
    early_quit_all: bool,
    seed: u64,
    convention: ConventionKind,
    timeout_flag: bool,
    stats: CampaignStats,
}

impl<E: ExecutionEngine> std::fmt::Debug for TestLauncher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLauncher")
            .field("cases", &self.catalog.len())
            .field("convention", &self.convention)
            .field("seed", &self.seed)
            .field("timeout_flag", &self.timeout_flag)
            .finish()
    }
}

impl<E: ExecutionEngine> TestLauncher<E> {
    /// Validate the catalog and capture the pristine snapshot. `engine` must
    /// already hold the code under test.
    pub fn new(
        mut engine: E,
        catalog: Arc<Vec<TestCase>>,
        config: &ProbeConfig,
        layout: Option<Arc<dyn LayoutResolver>>,
    ) -> Result<Self> {
        let mut enabled = Vec::with_capacity(catalog.len());
        for (index, case) in catalog.iter().enumerate() {
            case.validate(index)?;
            let usable = match &layout {
                _ if !case.needs_layout() => true,
                None => {
                    tracing::warn!(
                        "[CATALOG] {} disabled: needs struct layouts {:?} but no resolver is configured",
                        case.func(),
                        case.layout_types()
                    );
                    false
                }
                Some(resolver) => {
                    if let Some(missing) = case
                        .layout_types()
                        .iter()
                        .find(|ty| !resolver.has_type(ty))
                    {
                        return Err(crate::error::ConstructionError::UnresolvedType {
                            func: case.func().to_string(),
                            type_name: missing.clone(),
                        }
                        .into());
                    }
                    true
                }
            };
            enabled.push(usable);
        }

        let mut controller = SnapshotController::new();
        controller.begin_campaign(&mut engine)?;

        let convention = config.convention.convention();
        tracing::info!(
            "[PROBE] launcher ready: {} cases ({} enabled), abi={}, timeout={}ms, seed={:#x}",
            catalog.len(),
            enabled.iter().filter(|e| **e).count(),
            config.convention.as_str(),
            config.timeout.as_millis(),
            config.seed
        );

        Ok(Self {
            engine,
            catalog,
            enabled,
            layout,
            controller,
            binder: ArgumentBinder::new(convention, 0),
            scratch: CaseScratch::new(config.alloc_base),
            timeout: config.timeout,
            early_quit_all: config.early_quit_all,
            seed: config.seed,
            convention: config.convention,
            timeout_flag: false,
            stats: CampaignStats::default(),
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Whether a run for the last probed address hit the timeout.
    pub fn timeout_flag(&self) -> bool {
        self.timeout_flag
    }

    pub fn stats(&self) -> CampaignStats {
        let restores = self.controller.counters();
        CampaignStats {
            full_restores: restores.full,
            register_restores: restores.registers_only,
            ..self.stats
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn disabled_cases(&self) -> Vec<String> {
        self.catalog
            .iter()
            .zip(&self.enabled)
            .filter(|(_, enabled)| !**enabled)
            .map(|(case, _)| case.func().to_string())
            .collect()
    }

    /// Probe one address with the whole catalog.
    pub fn run(&mut self, address: u64) -> Result<MatchSet> {
        let catalog = Arc::clone(&self.catalog);
        let mut rng = DetRng::for_address(self.seed, address);
        let mut matches = MatchSet::new();
        self.timeout_flag = false;
        self.stats.addresses += 1;
        tracing::debug!("[PROBE] probing {:#x}", address);

        for (index, case) in catalog.iter().enumerate() {
            if !self.enabled[index] {
                continue;
            }
            if self.early_quit_all && self.timeout_flag {
                self.stats.early_quits += 1;
                tracing::warn!(
                    "[PROBE] {:#x}: timeout seen, skipping the remaining {} cases",
                    address,
                    catalog.len() - index
                );
                break;
            }

            self.controller.begin_case();
            self.scratch.reset();
            self.stats.cases_run += 1;

            let mut engine_error: Option<EngineError> = None;
            let verdict = case.tree().execute(&mut |leaf: &TestLeaf| {
                if engine_error.is_some() {
                    return false;
                }
                match self.run_subtest(case, leaf, &mut rng, address) {
                    Ok(passed) => passed,
                    Err(err) => {
                        engine_error = Some(err);
                        false
                    }
                }
            });
            if let Some(err) = engine_error {
                return Err(ProbeError::Engine(err));
            }

            if verdict {
                tracing::debug!("[PROBE] {:#x} behaves like {}", address, case.func());
                matches.insert(case.func().to_string());
            }
        }

        if !matches.is_empty() {
            tracing::info!("[PROBE] {:#x} -> {:?}", address, matches);
        }
        Ok(matches)
    }

    fn run_subtest(
        &mut self,
        case: &TestCase,
        leaf: &TestLeaf,
        rng: &mut DetRng,
        address: u64,
    ) -> std::result::Result<bool, EngineError> {
        self.controller.before_subtest(&mut self.engine)?;
        self.binder.reset(case.declared_arity());

        let mut ctx = SetupContext {
            machine: self.engine.machine_mut(),
            scratch: &mut self.scratch,
            rng,
            binder: &mut self.binder,
            layout: self.layout.as_deref(),
        };
        let mut prepared = (leaf.setup)(&mut ctx);
        if prepared.is_ok() {
            prepared = self
                .binder
                .prepare_call(self.engine.machine_mut(), SENTINEL_RETURN)
                .map_err(SubtestError::from);
        }
        if let Err(err) = prepared {
            self.stats.setup_errors += 1;
            match err {
                SubtestError::ArgumentOutOfRange { .. } => {
                    tracing::error!("[CATALOG] {}/{}: {}", case.func(), leaf.label, err)
                }
                SubtestError::ArenaExhausted { .. }
                | SubtestError::Memory(MemoryFault {
                    kind: MemoryFaultKind::Overlap,
                    ..
                }) => tracing::warn!(
                    "[PROBE] {}/{}: fixture placement failed: {}",
                    case.func(),
                    leaf.label,
                    err
                ),
                _ => tracing::debug!("[PROBE] {}/{} setup failed: {}", case.func(), leaf.label, err),
            }
            self.controller.after_subtest(false, case.is_persistent());
            return Ok(false);
        }

        self.stats.subtests += 1;
        let started = Instant::now();
        let status = self.engine.run(address, SENTINEL_RETURN, self.timeout);
        match status {
            RunStatus::TimedOut => {
                self.timeout_flag = true;
                self.stats.timeouts += 1;
                tracing::warn!(
                    "[PROBE] {:#x} {}/{} timed out after {}ms",
                    address,
                    case.func(),
                    leaf.label,
                    started.elapsed().as_millis()
                );
                self.controller.after_subtest(false, case.is_persistent());
                return Ok(false);
            }
            RunStatus::Faulted => {
                self.stats.faults += 1;
                tracing::debug!("[PROBE] {:#x} {}/{} faulted", address, case.func(), leaf.label);
                self.controller.after_subtest(false, case.is_persistent());
                return Ok(false);
            }
            RunStatus::Completed => {
                self.controller.after_subtest(true, case.is_persistent());
            }
        }

        self.stats.verify_calls += 1;
        let ctx = VerifyContext {
            machine: self.engine.machine(),
            scratch: &self.scratch,
            binder: &self.binder,
            layout: self.layout.as_deref(),
        };
        let verdict = match (leaf.verify)(&ctx) {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::debug!("[PROBE] {}/{} verify error: {}", case.func(), leaf.label, err);
                false
            }
        };
        tracing::debug!(
            "[PROBE] {:#x} {}/{} -> {}",
            address,
            case.func(),
            leaf.label,
            if verdict { "pass" } else { "fail" }
        );
        Ok(verdict)
    }

    /// Probe every address in order and collect a report. Counters start
    /// from zero for each campaign.
    pub fn run_campaign(&mut self, addresses: &[u64]) -> Result<CampaignReport> {
        let started = Instant::now();
        self.stats = CampaignStats::default();
        self.controller.reset_counters();
        tracing::info!(
            "[CAMPAIGN] {} candidate addresses, seed={:#x}",
            addresses.len(),
            self.seed
        );
        let mut report = CampaignReport::new(self.seed, self.convention, self.disabled_cases());
        for &address in addresses {
            let matches = self.run(address)?;
            report.results.insert(address, matches);
        }
        report.stats = self.stats();
        report.elapsed_ms = started.elapsed().as_millis();
        tracing::info!(
            "[CAMPAIGN] done in {}ms: {} subtests, {} timeouts, {} faults, {} full / {} register restores",
            report.elapsed_ms,
            report.stats.subtests,
            report.stats.timeouts,
            report.stats.faults,
            report.stats.full_restores,
            report.stats.register_restores
        );
        Ok(report)
    }
}
