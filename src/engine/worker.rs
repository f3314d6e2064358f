// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One long-lived task per tenant running the diff/apply state machine.

use crate::admission::AdmissionGuard;
use crate::cluster::ClusterApi;
use crate::constants::backoff::MAX_CONFLICT_RETRIES;
use crate::engine::diff::compute_plan;
use crate::engine::manager::EngineSettings;
use crate::engine::plan::{Operation, ReconciliationPlan};
use crate::engine::status::{StatusBoard, TenantPhase};
use crate::error::{QuotaKeeperError, Result};
use crate::registry::TenantRegistry;
use crate::types::ObservedState;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Why a worker should run a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Wake {
    Observed,
    Desired,
    /// Operator retry; clears the failure count
    Retry,
}

/// Per-tenant mutual exclusion for Diffing and Applying
#[derive(Clone, Default)]
pub(crate) struct TenantLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TenantLocks {
    pub async fn acquire(&self, tenant: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            locks.entry(tenant.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop an offboarded tenant's lock unless someone holds or awaits it
    pub async fn forget(&self, tenant: &str) {
        let mut locks = self.inner.lock().await;
        if locks.get(tenant).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(tenant);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Everything a worker or teardown needs, shared across tenants
pub(crate) struct WorkerContext {
    pub cluster: Arc<dyn ClusterApi>,
    pub registry: Arc<TenantRegistry>,
    pub status: StatusBoard,
    pub guard: AdmissionGuard,
    pub settings: EngineSettings,
    pub locks: TenantLocks,
}

pub(crate) enum Executed {
    Completed,
    Cancelled,
}

impl WorkerContext {
    /// Run a plan in order, stopping at the first failure.
    ///
    /// `cancel` is only consulted between actions. Deletions the admission
    /// guard refuses are skipped and recorded, not failed.
    pub async fn execute(
        &self,
        plan: &ReconciliationPlan,
        observed: &ObservedState,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Executed> {
        for action in &plan.actions {
            if *cancel.borrow() {
                info!("Cancelled before {}", action);
                return Ok(Executed::Cancelled);
            }

            match action.op {
                Operation::Create | Operation::Update => {
                    if let Some(desired) = &action.desired {
                        self.cluster.apply(desired, action.token.as_deref()).await?;
                    }
                }
                Operation::Delete => {
                    let live = observed.get(&action.target).map(|o| &o.object);
                    let tenants = self.registry.list().await;
                    if let Err(refusal) =
                        self.guard
                            .check_object_deletion(&plan.tenant, &action.target, live, &tenants)
                    {
                        let err = refusal.into_orphan(action.target.clone());
                        warn!("{}", err);
                        let message = err.to_string();
                        self.status
                            .update(&plan.tenant, |s| s.last_refusal = Some(message))
                            .await;
                        continue;
                    }
                    self.cluster
                        .delete(&action.target, action.token.as_deref())
                        .await?;
                }
            }
        }
        Ok(Executed::Completed)
    }

    /// Remove every managed object of an offboarded tenant.
    /// Skipped if the tenant was put back before the lock was acquired.
    #[instrument(skip(self, cancel))]
    pub async fn teardown(&self, tenant: &str, cancel: &watch::Receiver<bool>) {
        self.remove_objects(tenant, cancel).await;
        self.locks.forget(tenant).await;
    }

    async fn remove_objects(&self, tenant: &str, cancel: &watch::Receiver<bool>) {
        let _lock = self.locks.acquire(tenant).await;
        if self.registry.get(tenant).await.is_ok() {
            debug!("Tenant was re-registered, skipping teardown");
            return;
        }

        let observed = match self.cluster.observe(tenant).await {
            Ok(observed) => observed,
            Err(e) => {
                error!("Failed to observe tenant for teardown: {}", e);
                return;
            }
        };
        let plan = compute_plan(tenant, None, &observed, true);
        info!("Tearing down {} objects", plan.len());

        if let Err(e) = self.execute(&plan, &observed, cancel).await {
            error!("Teardown failed: {}", e);
        }
        self.status.remove(tenant).await;
    }
}

/// Dispatcher-side handle to a running worker
pub(crate) struct WorkerHandle {
    wake_tx: mpsc::UnboundedSender<Wake>,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(tenant: &str, ctx: Arc<WorkerContext>, initial: Wake) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let worker = TenantWorker {
            tenant: tenant.to_string(),
            ctx,
            wake_rx,
            cancel_rx,
            failures: 0,
            waiting: Waiting::Idle,
        };
        let task = tokio::spawn(worker.run(initial));

        Self {
            wake_tx,
            cancel_tx,
            task,
        }
    }

    /// Returns false if the worker has exited
    pub fn wake(&self, wake: Wake) -> bool {
        self.wake_tx.send(wake).is_ok()
    }

    /// Signal cancellation and wait for the worker to finish its current action
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Tenant worker panicked: {}", e);
        }
    }
}

enum Waiting {
    Idle,
    Backoff(Instant),
    Degraded,
}

enum PassOutcome {
    Converged,
    Failed(QuotaKeeperError),
    Cancelled,
    /// Tenant no longer in the registry
    Gone,
}

struct TenantWorker {
    tenant: String,
    ctx: Arc<WorkerContext>,
    wake_rx: mpsc::UnboundedReceiver<Wake>,
    cancel_rx: watch::Receiver<bool>,
    failures: u32,
    waiting: Waiting,
}

impl TenantWorker {
    async fn run(mut self, initial: Wake) {
        debug!("Worker for tenant {} started", self.tenant);
        let mut next = Some(initial);

        while let Some(wake) = next {
            let wake = self.coalesce(wake);
            let degraded = matches!(self.waiting, Waiting::Degraded);
            if wake == Wake::Retry || (wake == Wake::Desired && degraded) {
                self.failures = 0;
            }

            match self.pass().await {
                PassOutcome::Converged => self.converged().await,
                PassOutcome::Failed(e) => self.failed(e).await,
                PassOutcome::Cancelled => break,
                PassOutcome::Gone => {
                    self.waiting = Waiting::Idle;
                    self.ctx.status.set_phase(&self.tenant, TenantPhase::Idle).await;
                }
            }
            next = self.wait().await;
        }

        debug!("Worker for tenant {} stopped", self.tenant);
    }

    /// Block until the current phase admits a new pass; `None` on cancellation
    async fn wait(&mut self) -> Option<Wake> {
        loop {
            let wake = match self.waiting {
                Waiting::Idle => tokio::select! {
                    _ = self.cancel_rx.changed() => return None,
                    wake = self.wake_rx.recv() => wake?,
                    _ = sleep(self.ctx.settings.resync_interval) => Wake::Observed,
                },
                // Observed drift does not shorten a backoff or lift a degradation
                Waiting::Backoff(until) => tokio::select! {
                    _ = self.cancel_rx.changed() => return None,
                    wake = self.wake_rx.recv() => match wake? {
                        Wake::Observed => continue,
                        other => other,
                    },
                    _ = sleep_until(until) => Wake::Observed,
                },
                Waiting::Degraded => tokio::select! {
                    _ = self.cancel_rx.changed() => return None,
                    wake = self.wake_rx.recv() => match wake? {
                        Wake::Observed => continue,
                        other => other,
                    },
                },
            };
            return Some(wake);
        }
    }

    /// Fold queued triggers into one pass; the strongest trigger wins
    fn coalesce(&mut self, mut wake: Wake) -> Wake {
        while let Ok(next) = self.wake_rx.try_recv() {
            wake = wake.max(next);
        }
        wake
    }

    #[instrument(skip(self), fields(tenant = %self.tenant))]
    async fn pass(&mut self) -> PassOutcome {
        let _lock = self.ctx.locks.acquire(&self.tenant).await;
        let mut conflicts = 0;

        loop {
            if *self.cancel_rx.borrow() {
                return PassOutcome::Cancelled;
            }
            self.ctx.status.set_phase(&self.tenant, TenantPhase::Diffing).await;

            let spec = match self.ctx.registry.get(&self.tenant).await {
                Ok(spec) => spec,
                Err(_) => return PassOutcome::Gone,
            };
            let observed = match self.ctx.cluster.observe(&self.tenant).await {
                Ok(observed) => observed,
                Err(e) => return PassOutcome::Failed(e),
            };

            let plan = compute_plan(
                &self.tenant,
                Some(&spec),
                &observed,
                self.ctx.settings.prune_extras,
            );
            if plan.is_empty() {
                debug!("No drift");
                return PassOutcome::Converged;
            }

            info!("Applying {} actions", plan.len());
            self.ctx.status.set_phase(&self.tenant, TenantPhase::Applying).await;

            match self.ctx.execute(&plan, &observed, &self.cancel_rx).await {
                Ok(Executed::Completed) => return PassOutcome::Converged,
                Ok(Executed::Cancelled) => return PassOutcome::Cancelled,
                Err(QuotaKeeperError::Conflict(id)) if conflicts < MAX_CONFLICT_RETRIES => {
                    conflicts += 1;
                    debug!("Version conflict on {}, re-diffing ({})", id, conflicts);
                }
                Err(e) => return PassOutcome::Failed(e),
            }
        }
    }

    async fn converged(&mut self) {
        self.failures = 0;
        self.waiting = Waiting::Idle;
        self.ctx
            .status
            .update(&self.tenant, |s| {
                s.phase = TenantPhase::Idle;
                s.consecutive_failures = 0;
                s.last_error = None;
                s.last_reconciled = Some(Utc::now());
                s.next_attempt = None;
            })
            .await;
    }

    async fn failed(&mut self, e: QuotaKeeperError) {
        self.failures += 1;
        let failures = self.failures;
        let message = e.to_string();
        let backoff = &self.ctx.settings.backoff;

        if backoff.exhausted(failures) {
            let degraded = QuotaKeeperError::DegradedTenant {
                tenant: self.tenant.clone(),
                failures,
                last_error: message.clone(),
            };
            error!("{}", degraded);
            self.waiting = Waiting::Degraded;
            self.ctx
                .status
                .update(&self.tenant, |s| {
                    s.phase = TenantPhase::Degraded;
                    s.consecutive_failures = failures;
                    s.last_error = Some(message);
                    s.next_attempt = None;
                })
                .await;
            return;
        }

        let delay = backoff.jittered(failures);
        warn!(
            "Reconciliation of tenant {} failed ({} consecutive), retrying in {:?}: {}",
            self.tenant, failures, delay, message
        );
        self.waiting = Waiting::Backoff(Instant::now() + delay);
        let next_attempt = chrono::Duration::from_std(delay)
            .ok()
            .map(|d| Utc::now() + d);
        self.ctx
            .status
            .update(&self.tenant, |s| {
                s.phase = TenantPhase::Backoff;
                s.consecutive_failures = failures;
                s.last_error = Some(message);
                s.next_attempt = next_attempt;
            })
            .await;
    }
}
