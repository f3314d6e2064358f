// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time snapshots of a tenant namespace as the cluster reports it.

use crate::types::objects::{ManagedObject, ObjectId, ObjectKind, ObservedObject};
use crate::types::usage::UsageSample;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Snapshot of one namespace's managed objects.
///
/// A new snapshot supersedes the previous one; snapshots are never edited.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedState {
    pub namespace: String,
    pub objects: BTreeMap<ObjectId, ObservedObject>,
    pub observed_at: DateTime<Utc>,
}

impl ObservedState {
    pub fn new(
        namespace: &str,
        objects: impl IntoIterator<Item = ObservedObject>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            objects: objects
                .into_iter()
                .map(|o| (o.object.id(), o))
                .collect(),
            observed_at,
        }
    }

    /// Snapshot of a namespace that does not exist
    pub fn empty(namespace: &str, observed_at: DateTime<Utc>) -> Self {
        Self::new(namespace, Vec::new(), observed_at)
    }

    pub fn namespace_exists(&self) -> bool {
        self.objects.contains_key(&ObjectId::namespace(&self.namespace))
    }

    pub fn get(&self, id: &ObjectId) -> Option<&ObservedObject> {
        self.objects.get(id)
    }

    pub fn of_kind(&self, kind: ObjectKind) -> impl Iterator<Item = &ObservedObject> {
        self.objects.values().filter(move |o| o.object.kind() == kind)
    }

    /// Usage samples derived from the quota status, one per tracked resource
    pub fn usage_samples(&self) -> Vec<UsageSample> {
        self.of_kind(ObjectKind::ResourceQuota)
            .filter_map(|o| match &o.object {
                ManagedObject::ResourceQuota(q) => {
                    UsageSample::from_quota(&q.namespace, q, self.observed_at)
                }
                _ => None,
            })
            .flatten()
            .collect()
    }
}
