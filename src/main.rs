//! Freepool - Entry Point
//!
//! Starts the background loops and the control surface with graceful
//! shutdown support.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use freepool::api::ApiServer;
use freepool::config::LogConfig;
use freepool::lifecycle::{wait_for_signal, Shutdown};
use freepool::proxy::{AllocationMachine, HealthChecker, HealthCheckerConfig, Prober, TransportProber};
use freepool::repository::ProxyRepository;
use freepool::services::{
    AuditConfig, AvailabilityAudit, Collector, DiscoveryConfig, DiscoveryService,
    LeaseReclaimConfig, LeaseReclaimer,
};
use freepool::{Config, Database, PoolEngine};

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("freepool={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.log);

    info!("Starting freepool");

    let db = Database::new(&config.store)
        .await
        .with_context(|| format!("failed to open store at {}", config.store.data_dir.display()))?;
    info!("Opened {} shards under {}", db.shard_ids().len(), db.root().display());

    let repo = ProxyRepository::new(db.clone());
    let allocator = Arc::new(AllocationMachine::new());
    let prober: Arc<dyn Prober> = Arc::new(
        TransportProber::new(config.probe.clone()).context("invalid probe configuration")?,
    );

    let shutdown = Shutdown::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let health_checker = HealthChecker::new(
        repo.clone(),
        prober.clone(),
        HealthCheckerConfig::from(&config.health),
    );
    let signal = shutdown.subscribe();
    tasks.push(tokio::spawn(async move { health_checker.run(signal).await }));

    let discovery = DiscoveryService::new(
        repo.clone(),
        allocator.clone(),
        prober.clone(),
        DiscoveryConfig::from(&config.allocation),
    );
    let signal = shutdown.subscribe();
    tasks.push(tokio::spawn(async move { discovery.run(signal).await }));

    let reclaimer = LeaseReclaimer::new(
        allocator.clone(),
        prober.clone(),
        LeaseReclaimConfig::from(&config.allocation),
    );
    let signal = shutdown.subscribe();
    tasks.push(tokio::spawn(async move { reclaimer.run(signal).await }));

    let audit = AvailabilityAudit::new(
        allocator.clone(),
        prober.clone(),
        AuditConfig::from(&config.allocation),
    );
    let signal = shutdown.subscribe();
    tasks.push(tokio::spawn(async move { audit.run(signal).await }));

    match Collector::from_config(repo.clone(), &config.collector)
        .context("invalid collector configuration")?
    {
        Some(collector) => {
            let signal = shutdown.subscribe();
            tasks.push(tokio::spawn(async move { collector.run(signal).await }));
        }
        None => info!("No COLLECTOR_SOURCE_URL set, collector disabled"),
    }

    let engine = PoolEngine::new(repo, allocator, prober);
    let api_server = ApiServer::new(config.api.clone(), engine);
    let api_shutdown = shutdown.subscribe();
    let mut api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Control surface listening on {}", config.api_addr());

    tokio::select! {
        _ = wait_for_signal() => info!("Shutdown signal received"),
        _ = &mut api_task => warn!("API server exited unexpectedly"),
    }

    shutdown.trigger();

    if !api_task.is_finished() {
        let abort = api_task.abort_handle();
        if tokio::time::timeout(config.api.shutdown_grace, api_task)
            .await
            .is_err()
        {
            warn!(
                "In-flight requests did not drain within {}s, aborting",
                config.api.shutdown_grace.as_secs()
            );
            abort.abort();
        }
    }

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!("Background task failed: {}", e);
        }
    }

    db.close().await;
    info!("Freepool stopped");
    Ok(())
}
