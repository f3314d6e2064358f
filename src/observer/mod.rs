// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster State Observer: turns the cluster watch into ordered, deduplicable changes.

pub mod dedup;
pub mod watch;

pub use dedup::Deduplicator;
pub use watch::{ClusterObserver, ObjectTracker};

use crate::types::{ManagedObject, ObjectId};

/// A change to one managed object; `object` is `None` for a tombstone
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedChange {
    pub id: ObjectId,
    pub version: u64,
    pub object: Option<ManagedObject>,
}

impl ObservedChange {
    /// Tenant whose namespace holds the object
    pub fn tenant(&self) -> &str {
        &self.id.namespace
    }

    pub fn is_tombstone(&self) -> bool {
        self.object.is_none()
    }
}
