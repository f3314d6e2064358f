// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Tenant registry store: validated, durable, and change-notifying.

use crate::admission::AdmissionGuard;
use crate::engine::{EngineEvent, EngineHandle};
use crate::error::{QuotaKeeperError, Result};
use crate::persist::{read_json, write_json_atomic};
use crate::types::TenantSpec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Holds desired-state tenant records keyed by namespace name.
///
/// Every write passes the admission guard, reaches the snapshot file (when
/// one is configured) before the in-memory map, and then notifies the engine.
pub struct TenantRegistry {
    tenants: RwLock<BTreeMap<String, TenantSpec>>,
    guard: AdmissionGuard,
    path: Option<PathBuf>,
    engine: EngineHandle,
}

impl TenantRegistry {
    /// Open the registry, loading the snapshot at `path` if it exists
    pub async fn open(
        guard: AdmissionGuard,
        path: Option<PathBuf>,
        engine: EngineHandle,
    ) -> Result<Self> {
        let mut tenants = BTreeMap::new();
        if let Some(path) = &path {
            let stored: Vec<TenantSpec> = read_json(path).await?.unwrap_or_default();
            for spec in stored {
                // A snapshot written under a different reserved prefix may hold specs we now reject
                if let Err(refusal) = guard.check_put(&spec) {
                    warn!("Skipping stored tenant {}: {}", spec.id, refusal);
                    continue;
                }
                tenants.insert(spec.id.clone(), spec);
            }
            info!("Loaded {} tenants from {}", tenants.len(), path.display());
        }

        Ok(Self {
            tenants: RwLock::new(tenants),
            guard,
            path,
            engine,
        })
    }

    /// Insert or replace a tenant spec
    #[instrument(skip(self, spec), fields(tenant = %spec.id))]
    pub async fn put(&self, spec: TenantSpec) -> Result<()> {
        self.guard
            .check_put(&spec)
            .map_err(|refusal| refusal.into_validation())?;

        let id = spec.id.clone();
        {
            let mut tenants = self.tenants.write().await;
            let mut next = tenants.clone();
            next.insert(id.clone(), spec);
            self.persist(&next).await?;
            *tenants = next;
        }

        info!("Tenant {} stored", id);
        self.engine.send(EngineEvent::DesiredChanged { tenant: id }).await;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<TenantSpec> {
        self.tenants
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| QuotaKeeperError::NotFound(id.to_string()))
    }

    /// All tenants, ordered by id
    pub async fn list(&self) -> Vec<TenantSpec> {
        self.tenants.read().await.values().cloned().collect()
    }

    /// Remove a tenant (offboarding)
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.guard
            .check_delete(id)
            .map_err(|refusal| refusal.into_validation())?;

        {
            let mut tenants = self.tenants.write().await;
            if !tenants.contains_key(id) {
                return Err(QuotaKeeperError::NotFound(id.to_string()));
            }
            let mut next = tenants.clone();
            next.remove(id);
            self.persist(&next).await?;
            *tenants = next;
        }

        info!("Tenant {} removed", id);
        self.engine
            .send(EngineEvent::DesiredDeleted {
                tenant: id.to_string(),
            })
            .await;
        Ok(())
    }

    /// Load tenant specs from a multi-document YAML file through `put`.
    /// Returns how many documents were accepted; invalid ones are logged and skipped.
    pub async fn seed_from_yaml(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut accepted = 0;

        for document in serde_yaml::Deserializer::from_str(&content) {
            let spec = match TenantSpec::deserialize(document) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("Skipping unparsable tenant document in {}: {}", path.display(), e);
                    continue;
                }
            };
            let id = spec.id.clone();
            match self.put(spec).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!("Skipping seeded tenant {}: {}", id, e),
            }
        }

        info!("Seeded {} tenants from {}", accepted, path.display());
        Ok(accepted)
    }

    async fn persist(&self, tenants: &BTreeMap<String, TenantSpec>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let specs: Vec<&TenantSpec> = tenants.values().collect();
        write_json_atomic(path, &specs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::rules;
    use crate::engine::engine_channel;
    use crate::types::tenant::fixtures::{full_tenant, quota, tenant};
    use tokio::sync::mpsc;

    async fn registry(path: Option<PathBuf>) -> (TenantRegistry, mpsc::Receiver<EngineEvent>) {
        let (handle, rx) = engine_channel();
        let registry = TenantRegistry::open(AdmissionGuard::new("kube-"), path, handle)
            .await
            .unwrap();
        (registry, rx)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let (registry, _rx) = registry(None).await;
        let spec = full_tenant("team-a");

        registry.put(spec.clone()).await.unwrap();

        assert_eq!(registry.get("team-a").await.unwrap(), spec);
    }

    #[tokio::test]
    async fn test_put_emits_desired_changed() {
        let (registry, mut rx) = registry(None).await;

        registry.put(tenant("team-a")).await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::DesiredChanged { tenant }) if tenant == "team-a"
        ));
    }

    #[tokio::test]
    async fn test_invalid_quota_ordering_leaves_registry_unchanged() {
        let (registry, mut rx) = registry(None).await;
        let original = tenant("team-a");
        registry.put(original.clone()).await.unwrap();
        rx.recv().await.unwrap();

        let mut invalid = tenant("team-a");
        invalid.quota = quota("2", "8Gi", "3", "4Gi");
        let err = registry.put(invalid).await.unwrap_err();

        assert!(matches!(
            err,
            QuotaKeeperError::Validation { rule, .. } if rule == rules::CPU_ORDERING
        ));
        assert_eq!(registry.get("team-a").await.unwrap(), original);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reserved_prefix_rejected() {
        let (registry, _rx) = registry(None).await;

        let err = registry.put(tenant("kube-test")).await.unwrap_err();

        assert!(matches!(
            err,
            QuotaKeeperError::Validation { rule, .. } if rule == rules::RESERVED_PREFIX
        ));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_and_delete_missing_tenant() {
        let (registry, _rx) = registry(None).await;

        assert!(matches!(
            registry.get("nobody").await,
            Err(QuotaKeeperError::NotFound(_))
        ));
        assert!(matches!(
            registry.delete("nobody").await,
            Err(QuotaKeeperError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_emits_desired_deleted() {
        let (registry, mut rx) = registry(None).await;
        registry.put(tenant("team-a")).await.unwrap();
        rx.recv().await.unwrap();

        registry.delete("team-a").await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::DesiredDeleted { tenant }) if tenant == "team-a"
        ));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_id() {
        let (registry, _rx) = registry(None).await;
        registry.put(tenant("team-b")).await.unwrap();
        registry.put(tenant("team-a")).await.unwrap();

        let ids: Vec<String> = registry.list().await.into_iter().map(|t| t.id).collect();

        assert_eq!(ids, vec!["team-a", "team-b"]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.json");
        {
            let (registry, _rx) = registry(Some(path.clone())).await;
            registry.put(full_tenant("team-a")).await.unwrap();
            registry.put(tenant("team-b")).await.unwrap();
            registry.delete("team-b").await.unwrap();
        }

        let (reopened, _rx) = registry(Some(path)).await;

        assert_eq!(reopened.list().await, vec![full_tenant("team-a")]);
    }

    #[tokio::test]
    async fn test_seed_from_yaml_skips_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.yaml");
        tokio::fs::write(
            &path,
            r#"
id: team-a
description: Team A
quota: { cpuLimit: "4", memLimit: 8Gi, cpuRequest: "2", memRequest: 4Gi, podLimit: 10 }
---
id: kube-test
quota: { cpuLimit: "4", memLimit: 8Gi, cpuRequest: "2", memRequest: 4Gi, podLimit: 10 }
---
id: team-b
quota: { cpuLimit: "1", memLimit: 1Gi, cpuRequest: 500m, memRequest: 512Mi, podLimit: 5 }
"#,
        )
        .await
        .unwrap();
        let (registry, _rx) = registry(None).await;

        let accepted = registry.seed_from_yaml(&path).await.unwrap();

        assert_eq!(accepted, 2);
        assert_eq!(registry.get("team-b").await.unwrap().quota.pod_limit, 5);
    }
}
