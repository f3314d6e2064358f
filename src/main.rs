// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quotakeeper::admission::AdmissionGuard;
use quotakeeper::api::{self, AppState};
use quotakeeper::cluster::ClusterApi;
use quotakeeper::config::Config;
use quotakeeper::engine::{engine_channel, ReconciliationEngine, StatusBoard};
use quotakeeper::kubernetes::{wait_for_api_groups, KubeCluster};
use quotakeeper::observer::ClusterObserver;
use quotakeeper::registry::TenantRegistry;
use quotakeeper::usage::{usage_channel, UsageAggregator, UsageStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting quotakeeper operator");
    info!(
        "Configuration loaded: reserved_prefix={}, prune_extras={}, max_retries={}",
        config.reserved_prefix, config.prune_extras, config.max_retries
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // RBAC and NetworkPolicy APIs must be served before any tenant is reconciled
    info!("Waiting for required API groups to become available...");
    wait_for_api_groups(&client).await?;

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client));
    let guard = AdmissionGuard::new(config.reserved_prefix.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The registry needs the engine handle before the engine exists
    let (engine_handle, engine_rx) = engine_channel();
    let registry = Arc::new(
        TenantRegistry::open(guard.clone(), config.registry_path.clone(), engine_handle.clone())
            .await
            .context("Failed to open tenant registry")?,
    );
    if let Some(seed) = &config.registry_seed {
        registry
            .seed_from_yaml(seed)
            .await
            .with_context(|| format!("Failed to seed tenants from {}", seed.display()))?;
    }

    let status = StatusBoard::new();
    let engine = ReconciliationEngine::new(
        cluster.clone(),
        registry.clone(),
        status.clone(),
        guard,
        config.engine_settings(),
        engine_rx,
        shutdown_rx.clone(),
    );

    let usage_store = Arc::new(
        UsageStore::open(config.usage_path.clone())
            .await
            .context("Failed to open usage store")?,
    );
    let (usage_handle, sample_rx) = usage_channel();
    let aggregator = UsageAggregator::new(
        cluster.clone(),
        registry.clone(),
        usage_store.clone(),
        Arc::new(config.pricing.clone()),
        config.aggregation_period,
        sample_rx,
        shutdown_rx.clone(),
    );

    let observer = ClusterObserver::new(
        cluster,
        engine_handle.clone(),
        usage_handle,
        config.resync_interval,
        shutdown_rx.clone(),
    );

    let state = AppState {
        registry,
        status,
        usage: usage_store,
        engine: engine_handle,
    };

    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C, running until killed: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
        Ok::<(), anyhow::Error>(())
    };

    info!("Starting observer, engine, aggregator and API server...");

    tokio::try_join!(
        signal,
        observer.run(),
        engine.run(),
        aggregator.run(),
        api::serve(config.listen_addr, state, shutdown_rx),
    )?;

    info!("quotakeeper stopped");
    Ok(())
}
