// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! kube-backed implementation of the cluster seam

use crate::cluster::{ClusterApi, WatchEvent};
use crate::constants::{labels, OPERATOR_NAME};
use crate::error::{QuotaKeeperError, Result};
use crate::kubernetes::convert;
use crate::types::{ManagedObject, ObjectId, ObjectKind, ObservedObject, ObservedState};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, Preconditions},
    Api, Client, Resource,
};
use kube_runtime::watcher::Config as WatcherConfig;
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info, instrument};

/// Converts a typed object into its observed form
type FromK8s<K> = fn(&K) -> Result<ObservedObject>;

/// Cluster access through a shared kube `Client`
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn managed_selector() -> String {
        format!("{}={}", labels::MANAGED_BY, OPERATOR_NAME)
    }

    async fn list_namespaced<K>(
        &self,
        namespace: Option<&str>,
        params: &ListParams,
        from_k8s: FromK8s<K>,
    ) -> Result<Vec<ObservedObject>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api.list(params).await.map_err(transient)?;
        list.items.iter().map(from_k8s).collect()
    }

    async fn apply_namespaced<K>(&self, namespace: &str, name: &str, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let pp = PatchParams::apply(OPERATOR_NAME).force();
        api.patch(name, &pp, &Patch::Apply(object)).await?;
        Ok(())
    }

    async fn delete_namespaced<K>(&self, namespace: &str, name: &str, dp: &DeleteParams) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, dp).await?;
        Ok(())
    }

    /// Watch one kind, labelled as managed, mapped onto watch events
    fn watch_kind<K>(&self, from_k8s: FromK8s<K>) -> BoxStream<'static, Result<WatchEvent>>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let config = WatcherConfig::default().labels(&Self::managed_selector());

        watcher(api, config)
            .default_backoff()
            .filter_map(move |event| async move {
                match event {
                    Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                        Some(from_k8s(&obj).map(WatchEvent::Applied))
                    }
                    Ok(watcher::Event::Delete(obj)) => Some(from_k8s(&obj).map(|o| {
                        WatchEvent::Deleted {
                            id: o.object.id(),
                            version: o.version,
                        }
                    })),
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(QuotaKeeperError::TransientCluster(format!(
                        "watch failed: {}",
                        e
                    )))),
                }
            })
            .boxed()
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    #[instrument(skip(self))]
    async fn observe(&self, namespace: &str) -> Result<ObservedState> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = match namespaces.get_opt(namespace).await.map_err(transient)? {
            Some(ns) => ns,
            None => {
                debug!("Namespace {} does not exist", namespace);
                return Ok(ObservedState::empty(namespace, Utc::now()));
            }
        };

        // Only labelled objects are ours to update or prune
        let lp = ListParams::default().labels(&Self::managed_selector());
        let ns_name = Some(namespace);
        let mut objects = vec![convert::namespace_from_k8s(&ns)];
        objects.extend(
            self.list_namespaced::<ResourceQuota>(ns_name, &lp, |o| Ok(convert::quota_from_k8s(o)))
                .await?,
        );
        objects.extend(
            self.list_namespaced::<LimitRange>(ns_name, &lp, |o| {
                Ok(convert::limit_range_from_k8s(o))
            })
            .await?,
        );
        objects.extend(
            self.list_namespaced::<Role>(ns_name, &lp, |o| Ok(convert::role_from_k8s(o)))
                .await?,
        );
        objects.extend(
            self.list_namespaced::<RoleBinding>(ns_name, &lp, |o| Ok(convert::binding_from_k8s(o)))
                .await?,
        );
        objects.extend(
            self.list_namespaced::<NetworkPolicy>(ns_name, &lp, convert::policy_from_k8s)
                .await?,
        );

        Ok(ObservedState::new(namespace, objects, Utc::now()))
    }

    #[instrument(skip(self))]
    async fn list_managed(&self) -> Result<Vec<ObservedObject>> {
        let lp = ListParams::default().labels(&Self::managed_selector());

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let mut objects: Vec<ObservedObject> = namespaces
            .list(&lp)
            .await
            .map_err(transient)?
            .items
            .iter()
            .map(convert::namespace_from_k8s)
            .collect();

        objects.extend(
            self.list_namespaced::<ResourceQuota>(None, &lp, |o| Ok(convert::quota_from_k8s(o)))
                .await?,
        );
        objects.extend(
            self.list_namespaced::<LimitRange>(None, &lp, |o| Ok(convert::limit_range_from_k8s(o)))
                .await?,
        );
        objects.extend(
            self.list_namespaced::<Role>(None, &lp, |o| Ok(convert::role_from_k8s(o)))
                .await?,
        );
        objects.extend(
            self.list_namespaced::<RoleBinding>(None, &lp, |o| Ok(convert::binding_from_k8s(o)))
                .await?,
        );
        objects.extend(
            self.list_namespaced::<NetworkPolicy>(None, &lp, convert::policy_from_k8s)
                .await?,
        );

        info!("Listed {} managed objects", objects.len());
        Ok(objects)
    }

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent>> {
        stream::select_all(vec![
            self.watch_kind::<Namespace>(|o| Ok(convert::namespace_from_k8s(o))),
            self.watch_kind::<ResourceQuota>(|o| Ok(convert::quota_from_k8s(o))),
            self.watch_kind::<LimitRange>(|o| Ok(convert::limit_range_from_k8s(o))),
            self.watch_kind::<Role>(|o| Ok(convert::role_from_k8s(o))),
            self.watch_kind::<RoleBinding>(|o| Ok(convert::binding_from_k8s(o))),
            self.watch_kind::<NetworkPolicy>(convert::policy_from_k8s),
        ])
        .boxed()
    }

    #[instrument(skip(self, object, token), fields(object = %object.id()))]
    async fn apply(&self, object: &ManagedObject, token: Option<&str>) -> Result<()> {
        let id = object.id();
        let result = match object {
            ManagedObject::Namespace { name } => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                let pp = PatchParams::apply(OPERATOR_NAME).force();
                api.patch(name, &pp, &Patch::Apply(&convert::namespace_to_k8s(name, token)))
                    .await
                    .map(|_| ())
                    .map_err(QuotaKeeperError::from)
            }
            ManagedObject::ResourceQuota(o) => {
                self.apply_namespaced(&o.namespace, &o.name, &convert::quota_to_k8s(o, token))
                    .await
            }
            ManagedObject::LimitRange(o) => {
                self.apply_namespaced(&o.namespace, &o.name, &convert::limit_range_to_k8s(o, token))
                    .await
            }
            ManagedObject::Role(o) => {
                self.apply_namespaced(&o.namespace, &o.name, &convert::role_to_k8s(o, token))
                    .await
            }
            ManagedObject::RoleBinding(o) => {
                self.apply_namespaced(&o.namespace, &o.name, &convert::binding_to_k8s(o, token))
                    .await
            }
            ManagedObject::NetworkPolicy(o) => {
                let np = convert::policy_to_k8s(o, token)?;
                self.apply_namespaced(&o.namespace, &o.name, &np).await
            }
        };

        result.map_err(|e| classify(&id, e))?;
        info!("Applied {}", id);
        Ok(())
    }

    #[instrument(skip(self, token), fields(object = %id))]
    async fn delete(&self, id: &ObjectId, token: Option<&str>) -> Result<()> {
        let dp = DeleteParams {
            preconditions: token.filter(|t| !t.is_empty()).map(|t| Preconditions {
                resource_version: Some(t.to_string()),
                uid: None,
            }),
            ..Default::default()
        };

        let result = match id.kind {
            ObjectKind::Namespace => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                api.delete(&id.name, &dp)
                    .await
                    .map(|_| ())
                    .map_err(QuotaKeeperError::from)
            }
            ObjectKind::ResourceQuota => {
                self.delete_namespaced::<ResourceQuota>(&id.namespace, &id.name, &dp)
                    .await
            }
            ObjectKind::LimitRange => {
                self.delete_namespaced::<LimitRange>(&id.namespace, &id.name, &dp)
                    .await
            }
            ObjectKind::Role => {
                self.delete_namespaced::<Role>(&id.namespace, &id.name, &dp)
                    .await
            }
            ObjectKind::RoleBinding => {
                self.delete_namespaced::<RoleBinding>(&id.namespace, &id.name, &dp)
                    .await
            }
            ObjectKind::NetworkPolicy => {
                self.delete_namespaced::<NetworkPolicy>(&id.namespace, &id.name, &dp)
                    .await
            }
        };

        match result.map_err(|e| classify(id, e)) {
            Ok(()) => {
                info!("Deleted {}", id);
                Ok(())
            }
            Err(QuotaKeeperError::NotFound(_)) => {
                debug!("{} already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn transient(e: kube::Error) -> QuotaKeeperError {
    QuotaKeeperError::TransientCluster(e.to_string())
}

/// Map API failures onto the controller's error taxonomy
fn classify(id: &ObjectId, e: QuotaKeeperError) -> QuotaKeeperError {
    match e {
        QuotaKeeperError::KubeError(kube::Error::Api(err)) if err.code == 409 => {
            QuotaKeeperError::Conflict(id.clone())
        }
        QuotaKeeperError::KubeError(kube::Error::Api(err)) if err.code == 404 => {
            QuotaKeeperError::NotFound(id.to_string())
        }
        QuotaKeeperError::KubeError(kube::Error::Api(err))
            if err.code == 429 || err.code >= 500 =>
        {
            QuotaKeeperError::TransientCluster(format!("{}: {}", id, err.message))
        }
        QuotaKeeperError::KubeError(kube::Error::Api(err)) => QuotaKeeperError::KubeError(
            kube::Error::Api(err),
        ),
        QuotaKeeperError::KubeError(other) => {
            QuotaKeeperError::TransientCluster(format!("{}: {}", id, other))
        }
        other => other,
    }
}
