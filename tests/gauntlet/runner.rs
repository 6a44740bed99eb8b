use fnprobe::catalog::default_catalog;
use fnprobe::probe::launcher::TestLauncher;
use fnprobe::sandbox::libc::install_reference_routines;
use fnprobe::sandbox::scripted::ScriptedEngine;
use fnprobe::utils::config::ProbeConfig;
use fnprobe::utils::constants::{REFERENCE_CODE_BASE, REFERENCE_CODE_STRIDE};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::GauntletCase;

const GAUNTLET_SEED: u64 = 0x6a75_6e74_6c65_7400;

pub fn run_case(case: &GauntletCase) -> Result<(), String> {
    let mut engine = ScriptedEngine::new(case.convention)
        .map_err(|e| format!("sandbox init failed: {e}"))?;
    let installed =
        install_reference_routines(&mut engine, REFERENCE_CODE_BASE, REFERENCE_CODE_STRIDE)
            .map_err(|e| format!("installing reference routines failed: {e}"))?;
    let address = *installed
        .get(case.routine)
        .ok_or_else(|| format!("no reference routine named {}", case.routine))?;

    let catalog = default_catalog().map_err(|e| format!("catalog construction failed: {e}"))?;
    let config = ProbeConfig {
        timeout: Duration::from_millis(2_000),
        seed: GAUNTLET_SEED ^ u64::from(case.id),
        convention: case.convention,
        ..ProbeConfig::default()
    };
    let mut launcher = TestLauncher::new(engine, Arc::new(catalog), &config, None)
        .map_err(|e| format!("launcher construction failed: {e}"))?;
    let matches = launcher
        .run(address)
        .map_err(|e| format!("probe failed: {e}"))?;

    if !matches.contains(case.routine) {
        return Err(format!(
            "{} at {:#x} was not recognised, matched {:?}",
            case.routine, address, matches
        ));
    }
    if let Some(other) = case.must_not_match.iter().find(|n| matches.contains(**n)) {
        return Err(format!(
            "{} was confused with {}, matched {:?}",
            case.routine, other, matches
        ));
    }
    if launcher.timeout_flag() {
        return Err(format!("{} hit the run timeout", case.routine));
    }
    Ok(())
}
