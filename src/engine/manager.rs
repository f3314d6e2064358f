// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Central dispatcher routing registry and cluster events to tenant workers.

use crate::admission::AdmissionGuard;
use crate::cluster::ClusterApi;
use crate::engine::backoff::BackoffPolicy;
use crate::engine::status::StatusBoard;
use crate::engine::worker::{TenantLocks, Wake, WorkerContext, WorkerHandle};
use crate::observer::{Deduplicator, ObservedChange};
use crate::registry::TenantRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

/// Events the registry, observer and API send to the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A tenant spec was created or replaced
    DesiredChanged { tenant: String },
    /// A tenant was removed from the registry
    DesiredDeleted { tenant: String },
    /// A managed object changed in the cluster
    ObservedChanged(ObservedChange),
    /// Operator asked to retry a tenant, clearing Degraded
    Retry { tenant: String },
}

/// Handle to send events to the engine
#[derive(Clone)]
pub struct EngineHandle {
    event_tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    pub async fn send(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.send(event).await {
            error!("Failed to send event to engine: {}", e);
        }
    }
}

/// Create the engine's event channel. The handle is needed by the registry
/// before the engine itself can be built.
pub fn engine_channel() -> (EngineHandle, mpsc::Receiver<EngineEvent>) {
    let (event_tx, event_rx) = mpsc::channel(256);
    (EngineHandle { event_tx }, event_rx)
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Delete managed objects the spec no longer implies, and tear down offboarded tenants
    pub prune_extras: bool,
    pub backoff: BackoffPolicy,
    /// Idle tenants re-diff at this interval even without events
    pub resync_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            prune_extras: false,
            backoff: BackoffPolicy::default(),
            resync_interval: Duration::from_secs(300),
        }
    }
}

/// Owns one worker per registered tenant and feeds them events.
pub struct ReconciliationEngine {
    ctx: Arc<WorkerContext>,
    event_rx: mpsc::Receiver<EngineEvent>,
    shutdown: watch::Receiver<bool>,
    workers: HashMap<String, WorkerHandle>,
    dedup: Deduplicator,
    teardowns: JoinSet<()>,
}

impl ReconciliationEngine {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        registry: Arc<TenantRegistry>,
        status: StatusBoard,
        guard: AdmissionGuard,
        settings: EngineSettings,
        event_rx: mpsc::Receiver<EngineEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let ctx = WorkerContext {
            cluster,
            registry,
            status,
            guard,
            settings,
            locks: TenantLocks::default(),
        };

        Self {
            ctx: Arc::new(ctx),
            event_rx,
            shutdown,
            workers: HashMap::new(),
            dedup: Deduplicator::new(),
            teardowns: JoinSet::new(),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let tenants = self.ctx.registry.list().await;
        info!("Reconciliation engine started with {} tenants", tenants.len());
        for spec in &tenants {
            self.wake_or_spawn(&spec.id, Wake::Desired);
        }

        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = self.shutdown.changed() => break,
            }
        }

        info!("Stopping {} tenant workers", self.workers.len());
        for (_, worker) in self.workers.drain() {
            worker.cancel().await;
        }
        while self.teardowns.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        debug!("Handling event: {:?}", event);

        match event {
            EngineEvent::DesiredChanged { tenant } => self.wake_or_spawn(&tenant, Wake::Desired),
            EngineEvent::DesiredDeleted { tenant } => self.handle_deleted(tenant),
            EngineEvent::ObservedChanged(change) => self.handle_observed(change),
            EngineEvent::Retry { tenant } => {
                if self.ctx.registry.get(&tenant).await.is_ok() {
                    self.wake_or_spawn(&tenant, Wake::Retry);
                }
            }
        }
    }

    fn wake_or_spawn(&mut self, tenant: &str, wake: Wake) {
        if let Some(worker) = self.workers.get(tenant) {
            if worker.wake(wake) {
                return;
            }
        }
        debug!("Spawning worker for tenant {}", tenant);
        let worker = WorkerHandle::spawn(tenant, self.ctx.clone(), wake);
        self.workers.insert(tenant.to_string(), worker);
    }

    #[instrument(skip(self))]
    fn handle_deleted(&mut self, tenant: String) {
        let worker = self.workers.remove(&tenant);
        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.clone();

        self.teardowns.spawn(async move {
            if let Some(worker) = worker {
                worker.cancel().await;
            }
            if ctx.settings.prune_extras {
                ctx.teardown(&tenant, &shutdown).await;
            } else if ctx.registry.get(&tenant).await.is_err() {
                info!("Tenant {} offboarded, leaving its objects in place", tenant);
                ctx.status.remove(&tenant).await;
                ctx.locks.forget(&tenant).await;
            }
        });
    }

    fn handle_observed(&mut self, change: ObservedChange) {
        if !self.dedup.admit(&change.id, change.version) {
            debug!("Dropping replayed change to {} at {}", change.id, change.version);
            return;
        }
        if change.is_tombstone() {
            self.dedup.forget(&change.id);
        }
        let woken = self
            .workers
            .get(change.tenant())
            .map(|worker| worker.wake(Wake::Observed));
        match woken {
            Some(true) => {}
            // Worker exited on its own; restart it
            Some(false) => self.wake_or_spawn(change.tenant(), Wake::Observed),
            None => debug!("Ignoring change to {} outside any tenant", change.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::names;
    use crate::engine::diff::compute_plan;
    use crate::engine::status::{TenantPhase, TenantStatus};
    use crate::test_utils::{Fault, FakeCluster};
    use crate::types::tenant::fixtures::{full_tenant, tenant};
    use crate::types::{ManagedObject, ObjectId, ObjectKind, TenantSpec};
    use tokio::task::JoinHandle;

    struct Harness {
        cluster: Arc<FakeCluster>,
        registry: Arc<TenantRegistry>,
        status: StatusBoard,
        engine: EngineHandle,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<anyhow::Result<()>>,
    }

    impl Harness {
        async fn start(cluster: FakeCluster, settings: EngineSettings) -> Self {
            let cluster = Arc::new(cluster);
            let (engine, event_rx) = engine_channel();
            let registry = Arc::new(
                TenantRegistry::open(AdmissionGuard::new("kube-"), None, engine.clone())
                    .await
                    .unwrap(),
            );
            let status = StatusBoard::new();
            let (shutdown, shutdown_rx) = watch::channel(false);

            let task = tokio::spawn(
                ReconciliationEngine::new(
                    cluster.clone(),
                    registry.clone(),
                    status.clone(),
                    AdmissionGuard::new("kube-"),
                    settings,
                    event_rx,
                    shutdown_rx,
                )
                .run(),
            );

            Self {
                cluster,
                registry,
                status,
                engine,
                shutdown,
                task,
            }
        }

        /// Poll the status board until `done` holds, advancing paused time
        async fn wait_for<F>(&self, tenant: &str, done: F) -> TenantStatus
        where
            F: Fn(&TenantStatus) -> bool,
        {
            for _ in 0..5_000 {
                if let Some(status) = self.status.get(tenant).await {
                    if done(&status) {
                        return status;
                    }
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            panic!("tenant {} never reached the expected status", tenant);
        }

        async fn wait_converged(&self, tenant: &str) -> TenantStatus {
            self.wait_for(tenant, |s| {
                s.phase == TenantPhase::Idle && s.last_reconciled.is_some()
            })
            .await
        }

        async fn stop(self) {
            self.shutdown.send(true).unwrap();
            self.task.await.unwrap().unwrap();
        }
    }

    fn quota_id(tenant: &str) -> ObjectId {
        ObjectId::new(ObjectKind::ResourceQuota, tenant, names::QUOTA)
    }

    fn settings(prune_extras: bool) -> EngineSettings {
        EngineSettings {
            prune_extras,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_namespace_gets_only_its_quota() {
        let cluster = FakeCluster::new();
        cluster.insert(ManagedObject::Namespace {
            name: "team-a".to_string(),
        });
        let harness = Harness::start(cluster, settings(false)).await;

        harness.registry.put(tenant("team-a")).await.unwrap();
        let status = harness.wait_converged("team-a").await;

        assert_eq!(harness.cluster.applied(), vec![quota_id("team-a")]);
        assert_eq!(status.consecutive_failures, 0);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_converged_tenant_has_empty_plan() {
        let harness = Harness::start(FakeCluster::new(), settings(true)).await;
        let spec = full_tenant("team-a");

        harness.registry.put(spec.clone()).await.unwrap();
        harness.wait_converged("team-a").await;

        let observed = harness.cluster.observe("team-a").await.unwrap();
        assert!(compute_plan("team-a", Some(&spec), &observed, true).is_empty());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleven_failures_degrade_tenant() {
        let cluster = FakeCluster::new();
        cluster.fail_applies(u32::MAX, Fault::Transient);
        let harness = Harness::start(cluster, settings(false)).await;

        harness.registry.put(tenant("team-b")).await.unwrap();
        let status = harness
            .wait_for("team-b", |s| s.phase == TenantPhase::Degraded)
            .await;

        assert_eq!(status.consecutive_failures, 11);
        assert!(status.last_error.unwrap().contains("unavailable"));
        assert_eq!(harness.status.degraded().await.len(), 1);

        // No automatic retries once degraded
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        let later = harness.status.get("team-b").await.unwrap();
        assert_eq!(later.phase, TenantPhase::Degraded);
        assert_eq!(later.consecutive_failures, 11);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_retry_clears_degraded() {
        let cluster = FakeCluster::new();
        cluster.fail_applies(11, Fault::Transient);
        let harness = Harness::start(cluster, settings(false)).await;
        harness.registry.put(tenant("team-b")).await.unwrap();
        harness
            .wait_for("team-b", |s| s.phase == TenantPhase::Degraded)
            .await;

        harness
            .engine
            .send(EngineEvent::Retry {
                tenant: "team-b".to_string(),
            })
            .await;
        let status = harness.wait_converged("team-b").await;

        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_is_absorbed_by_rediff() {
        let cluster = FakeCluster::new();
        cluster.fail_applies(1, Fault::Conflict);
        let harness = Harness::start(cluster, settings(false)).await;

        harness.registry.put(tenant("team-a")).await.unwrap();
        let status = harness.wait_converged("team-a").await;

        assert_eq!(status.consecutive_failures, 0);
        assert!(harness.cluster.get(&quota_id("team-a")).is_some());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_failures_back_off_then_recover() {
        let cluster = FakeCluster::new();
        cluster.fail_observes(2);
        let harness = Harness::start(cluster, settings(false)).await;

        harness.registry.put(tenant("team-a")).await.unwrap();
        let status = harness.wait_converged("team-a").await;

        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
        assert!(harness.cluster.get(&quota_id("team-a")).is_some());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_puts_and_retries_converge_serially() {
        let cluster = FakeCluster::new();
        cluster.set_apply_delay(Duration::from_millis(50));
        let harness = Harness::start(cluster, settings(true)).await;

        for id in ["team-a", "team-b"] {
            harness.registry.put(full_tenant(id)).await.unwrap();
        }
        for _ in 0..5 {
            harness.registry.put(full_tenant("team-a")).await.unwrap();
            harness
                .engine
                .send(EngineEvent::Retry {
                    tenant: "team-a".to_string(),
                })
                .await;
        }
        harness.wait_converged("team-a").await;
        harness.wait_converged("team-b").await;

        assert_eq!(harness.cluster.max_in_flight(), 1);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_deletion_is_repaired() {
        let harness = Harness::start(FakeCluster::new(), settings(false)).await;
        harness.registry.put(tenant("team-a")).await.unwrap();
        harness.wait_converged("team-a").await;
        let removed = harness.cluster.get(&quota_id("team-a")).unwrap();
        harness.cluster.remove(&quota_id("team-a"));

        harness
            .engine
            .send(EngineEvent::ObservedChanged(ObservedChange {
                id: quota_id("team-a"),
                version: removed.version + 1,
                object: None,
            }))
            .await;
        for _ in 0..100 {
            if harness.cluster.get(&quota_id("team-a")).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(harness.cluster.get(&quota_id("team-a")).is_some());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_delete_cancels_between_actions() {
        let cluster = FakeCluster::new();
        cluster.set_apply_delay(Duration::from_millis(100));
        let harness = Harness::start(cluster, settings(false)).await;

        harness.registry.put(full_tenant("team-a")).await.unwrap();
        while harness.cluster.applied().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        harness.registry.delete("team-a").await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(harness.cluster.applied().len() < 6);
        assert!(harness.status.get("team-a").await.is_none());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pruned_tenant_is_torn_down() {
        let harness = Harness::start(FakeCluster::new(), settings(true)).await;
        harness.registry.put(full_tenant("team-a")).await.unwrap();
        harness.wait_converged("team-a").await;

        harness.registry.delete("team-a").await.unwrap();
        while harness.status.get("team-a").await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let deleted = harness.cluster.deleted();
        assert_eq!(deleted.len(), 6);
        assert_eq!(deleted.last(), Some(&ObjectId::namespace("team-a")));
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_leaves_preexisting_namespace() {
        let cluster = FakeCluster::new();
        cluster.insert_adopted(ManagedObject::Namespace {
            name: "team-a".to_string(),
        });
        let harness = Harness::start(cluster, settings(true)).await;
        harness.registry.put(tenant("team-a")).await.unwrap();
        harness.wait_converged("team-a").await;

        harness.registry.delete("team-a").await.unwrap();
        while harness.status.get("team-a").await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(harness.cluster.deleted(), vec![quota_id("team-a")]);
        assert!(harness.cluster.get(&ObjectId::namespace("team-a")).is_some());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_shared_cluster_role_is_revoked() {
        let harness = Harness::start(FakeCluster::new(), settings(true)).await;
        let with_view = |id: &str| TenantSpec {
            cluster_roles: vec!["view".to_string()],
            ..full_tenant(id)
        };
        harness.registry.put(with_view("team-b")).await.unwrap();
        harness.registry.put(with_view("team-a")).await.unwrap();
        harness.wait_converged("team-a").await;
        harness.wait_converged("team-b").await;
        let binding = |ns: &str| ObjectId::new(ObjectKind::RoleBinding, ns, "tenant-cr-view");
        assert!(harness.cluster.get(&binding("team-a")).is_some());

        harness.registry.put(full_tenant("team-a")).await.unwrap();
        for _ in 0..1_000 {
            if harness.cluster.get(&binding("team-a")).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = harness.wait_converged("team-a").await;

        assert!(harness.cluster.get(&binding("team-a")).is_none());
        assert!(harness.cluster.get(&binding("team-b")).is_some());
        assert!(status.last_refusal.is_none());
        harness.stop().await;
    }
}
