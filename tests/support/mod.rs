#![allow(dead_code)]

use fnprobe::probe::case::TestCase;
use fnprobe::probe::launcher::TestLauncher;
use fnprobe::sandbox::abi::ConventionKind;
use fnprobe::sandbox::layout::LayoutResolver;
use fnprobe::sandbox::libc::install_reference_routines;
use fnprobe::sandbox::scripted::ScriptedEngine;
use fnprobe::utils::config::ProbeConfig;
use fnprobe::utils::constants::{REFERENCE_CODE_BASE, REFERENCE_CODE_STRIDE};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SEED: u64 = 0x5eed_1234;

pub fn config(kind: ConventionKind, timeout_ms: u64) -> ProbeConfig {
    ProbeConfig {
        timeout: Duration::from_millis(timeout_ms),
        seed: TEST_SEED,
        convention: kind,
        ..ProbeConfig::default()
    }
}

/// Scripted sandbox with the reference libc routines installed.
pub fn reference_engine(kind: ConventionKind) -> (ScriptedEngine, BTreeMap<&'static str, u64>) {
    let mut engine = ScriptedEngine::new(kind).expect("scripted engine");
    let installed = install_reference_routines(&mut engine, REFERENCE_CODE_BASE, REFERENCE_CODE_STRIDE)
        .expect("install reference routines");
    (engine, installed)
}

pub fn launcher(
    engine: ScriptedEngine,
    catalog: Vec<TestCase>,
    config: &ProbeConfig,
    layout: Option<Arc<dyn LayoutResolver>>,
) -> TestLauncher<ScriptedEngine> {
    TestLauncher::new(engine, Arc::new(catalog), config, layout).expect("launcher construction")
}
