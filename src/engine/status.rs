// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-tenant reconciliation status, shared with the HTTP API.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TenantPhase {
    #[default]
    Idle,
    Diffing,
    Applying,
    Backoff,
    /// Retries exhausted; waits for a new put or an operator retry
    Degraded,
}

impl fmt::Display for TenantPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    pub phase: TenantPhase,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Most recent deletion the admission guard refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refusal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Shared map of tenant id to status
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<String, TenantStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, tenant: &str) -> Option<TenantStatus> {
        self.inner.read().await.get(tenant).cloned()
    }

    /// Mutate a tenant's status in place, creating it if needed
    pub async fn update<F>(&self, tenant: &str, f: F)
    where
        F: FnOnce(&mut TenantStatus),
    {
        let mut inner = self.inner.write().await;
        f(inner.entry(tenant.to_string()).or_default());
    }

    pub async fn set_phase(&self, tenant: &str, phase: TenantPhase) {
        self.update(tenant, |s| s.phase = phase).await;
    }

    pub async fn remove(&self, tenant: &str) {
        self.inner.write().await.remove(tenant);
    }

    /// Tenants waiting for operator action
    pub async fn degraded(&self) -> Vec<(String, TenantStatus)> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.phase == TenantPhase::Degraded)
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }
}
