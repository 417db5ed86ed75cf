//! The `serve` command: run everything.

use clap::Args;
use leadflow_core::Config;
use leadflow_engine::{JobQueue, RateGovernor, Reconciler, TenantRegistry, WorkerPool};
use leadflow_gateway::AppState;
use leadflow_store::Store;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Arguments for `leadflow serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Override the configured worker count.
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Run the gateway, worker pool, lease sweeper, and rollover scheduler
/// until interrupted.
pub async fn run(mut config: Config, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config.workers.count = workers;
    }

    let store = Store::connect(&config.database.url).await?;
    let registry = Arc::new(TenantRegistry::from_config(&config)?);
    let queue = Arc::new(JobQueue::new(store.clone(), config.queue.clone()));
    let governor = Arc::new(RateGovernor::new(store.clone(), config.warmup.clone()));
    let reconciler = Arc::new(Reconciler::new(store));

    // Make every configured sending number known to the governor; state of
    // numbers seen before survives untouched.
    for context in registry.iter() {
        governor.register_number(context).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = Arc::new(WorkerPool::new(
        queue.clone(),
        governor.clone(),
        reconciler,
        registry.clone(),
        config.workers.clone(),
    ));

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn({
        let pool = pool.clone();
        let shutdown = shutdown_rx.clone();
        async move { pool.run(shutdown).await }
    }));

    tasks.push(tokio::spawn({
        let queue = queue.clone();
        let shutdown = shutdown_rx.clone();
        async move { queue.run_sweeper(shutdown).await }
    }));

    tasks.push(tokio::spawn({
        let governor = governor.clone();
        let registry = registry.clone();
        let shutdown = shutdown_rx.clone();
        async move { governor.run_rollover_scheduler(registry, shutdown).await }
    }));

    tasks.push(tokio::spawn({
        let state = AppState {
            queue,
            governor,
            tenants: registry,
        };
        let gateway_config = config.gateway.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = leadflow_gateway::serve(state, &gateway_config, shutdown).await {
                error!(error = %e, "Gateway exited with error");
            }
        }
    }));

    info!(workers = config.workers.count, "Leadflow running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down; workers finish their current job");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
