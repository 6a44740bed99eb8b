use anyhow::Context;
use fnprobe::catalog::default_catalog;
use fnprobe::probe::runner::run_campaign_parallel;
use fnprobe::sandbox::layout::{LayoutResolver, StaticLayouts};
use fnprobe::sandbox::libc::install_reference_routines;
use fnprobe::sandbox::scripted::ScriptedEngine;
use fnprobe::utils::config::ProbeConfig;
use fnprobe::utils::constants::{REFERENCE_CODE_BASE, REFERENCE_CODE_STRIDE};
use fnprobe::utils::hex::to_u64;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Candidate addresses from argv; every installed reference routine when none
/// are given.
fn parse_candidates(installed: &BTreeMap<&'static str, u64>) -> anyhow::Result<Vec<u64>> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    if raw.is_empty() {
        return Ok(installed.values().copied().collect());
    }
    raw.iter()
        .map(|arg| to_u64(arg).with_context(|| format!("invalid candidate address `{arg}`")))
        .collect()
}

fn build_engine(config: &ProbeConfig) -> anyhow::Result<(ScriptedEngine, BTreeMap<&'static str, u64>)> {
    let mut engine = ScriptedEngine::new(config.convention).context("scripted sandbox init")?;
    let installed =
        install_reference_routines(&mut engine, REFERENCE_CODE_BASE, REFERENCE_CODE_STRIDE)
            .context("installing reference routines")?;
    Ok((engine, installed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ProbeConfig::from_env().context("loading PROBE_* configuration")?;
    tracing::info!(
        "[STARTUP] abi={} timeout={}ms workers={} early_quit_all={} seed={:#x}",
        config.convention.as_str(),
        config.timeout.as_millis(),
        config.workers,
        config.early_quit_all,
        config.seed
    );

    let layout: Option<Arc<dyn LayoutResolver>> = match &config.layout_file {
        Some(path) => {
            let layouts = StaticLayouts::from_file(path)?;
            tracing::info!("[STARTUP] {} struct layouts from {}", layouts.len(), path.display());
            Some(Arc::new(layouts))
        }
        None => None,
    };

    let catalog = Arc::new(default_catalog()?);
    let (_, installed) = build_engine(&config)?;
    let candidates = parse_candidates(&installed)?;
    let names_by_addr: BTreeMap<u64, &str> = installed.iter().map(|(n, a)| (*a, *n)).collect();

    let factory_config = config.clone();
    let report = run_campaign_parallel(
        move || build_engine(&factory_config).map(|(engine, _)| engine),
        catalog,
        config,
        layout,
        candidates,
    )
    .await?;

    for (addr, matches) in &report.results {
        let expected = names_by_addr.get(addr).copied().unwrap_or("?");
        let status = if matches.contains(expected) { "OK" } else { "MISS" };
        tracing::info!("[SELFCHECK] {:#x} ({}) {} -> {:?}", addr, expected, status, matches);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
