// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The seam between the controller and the cluster API server.

use crate::error::Result;
use crate::types::{ManagedObject, ObjectId, ObservedObject, ObservedState};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A raw change reported by the cluster watch
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Object added or modified
    Applied(ObservedObject),
    /// Object removed; carries the last version the server reported
    Deleted { id: ObjectId, version: u64 },
}

/// Operations the controller needs from the cluster.
///
/// Implementations must tolerate concurrent calls from every tenant loop.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Snapshot of every managed object in one namespace
    async fn observe(&self, namespace: &str) -> Result<ObservedState>;

    /// Every managed object across all tenant namespaces
    async fn list_managed(&self) -> Result<Vec<ObservedObject>>;

    /// Long-lived stream of changes to managed objects. The stream yields an
    /// error or ends when the underlying watch breaks; callers relist then.
    fn watch(&self) -> BoxStream<'static, Result<WatchEvent>>;

    /// Create or replace an object by identity. `token` is the version the
    /// caller last observed; a mismatch fails with `Conflict`.
    async fn apply(&self, object: &ManagedObject, token: Option<&str>) -> Result<()>;

    /// Delete an object; `token` guards against deleting a newer version.
    async fn delete(&self, id: &ObjectId, token: Option<&str>) -> Result<()>;
}
