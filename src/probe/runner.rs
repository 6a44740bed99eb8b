use crate::probe::case::TestCase;
use crate::probe::launcher::{CampaignReport, TestLauncher};
use crate::sandbox::layout::LayoutResolver;
use crate::sandbox::ExecutionEngine;
use crate::utils::config::ProbeConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Split `addresses` round-robin into at most `workers` non-empty partitions.
pub fn partition(addresses: &[u64], workers: usize) -> Vec<Vec<u64>> {
    let n = workers.max(1).min(addresses.len().max(1));
    let mut parts = vec![Vec::new(); n];
    for (i, addr) in addresses.iter().enumerate() {
        parts[i % n].push(*addr);
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Parallel campaign runner.
///
/// Each partition gets its own sandbox from `factory` and its own launcher on
/// the Tokio blocking pool. Filler is seeded per address, so the merged report
/// does not depend on how addresses were split. A worker that panics or fails
/// fails the whole campaign.
pub async fn run_campaign_parallel<E, F>(
    factory: F,
    catalog: Arc<Vec<TestCase>>,
    config: ProbeConfig,
    layout: Option<Arc<dyn LayoutResolver>>,
    addresses: Vec<u64>,
) -> Result<CampaignReport>
where
    E: ExecutionEngine + 'static,
    F: Fn() -> Result<E> + Send + Sync + 'static,
{
    let started = Instant::now();
    let factory = Arc::new(factory);
    let config = Arc::new(config);
    let parts = partition(&addresses, config.workers);
    tracing::info!(
        "[CAMPAIGN] {} addresses across {} workers, seed={:#x}",
        addresses.len(),
        parts.len(),
        config.seed
    );

    let mut join_set = JoinSet::new();
    for (worker, part) in parts.into_iter().enumerate() {
        let factory = Arc::clone(&factory);
        let catalog = Arc::clone(&catalog);
        let config = Arc::clone(&config);
        let layout = layout.as_ref().map(Arc::clone);
        join_set.spawn_blocking(move || -> Result<CampaignReport> {
            let engine = factory().with_context(|| format!("worker {worker}: sandbox factory"))?;
            let mut launcher = TestLauncher::new(engine, catalog, &config, layout)
                .with_context(|| format!("worker {worker}: launcher construction"))?;
            let report = launcher
                .run_campaign(&part)
                .with_context(|| format!("worker {worker}: campaign"))?;
            tracing::debug!("[CAMPAIGN] worker {} finished {} addresses", worker, part.len());
            Ok(report)
        });
    }

    let mut merged: Option<CampaignReport> = None;
    let mut failures: Vec<String> = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(report)) => match merged.as_mut() {
                Some(acc) => acc.merge(report),
                None => merged = Some(report),
            },
            Ok(Err(err)) => failures.push(format!("{err:#}")),
            Err(err) if err.is_panic() => failures.push(format!("panic: {err:?}")),
            Err(err) => failures.push(format!("cancelled: {err:?}")),
        }
    }

    if !failures.is_empty() {
        tracing::warn!(
            "[CAMPAIGN] parallel campaign failed (fail-closed): {}",
            failures.join("; ")
        );
        return Err(anyhow::anyhow!(
            "parallel campaign failed: {}",
            failures.join("; ")
        ));
    }

    let mut report = merged.unwrap_or_else(|| {
        CampaignReport::new(config.seed, config.convention, Vec::new())
    });
    report.elapsed_ms = started.elapsed().as_millis();
    Ok(report)
}
