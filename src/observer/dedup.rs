// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::types::ObjectId;
use std::collections::HashMap;

/// Drops observed changes that are not newer than one already seen.
///
/// Delivery is at-least-once, so every consumer of observed changes keeps one
/// of these keyed by `(ObjectId, version)`.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashMap<ObjectId, u64>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `version` is strictly newer than anything seen for `id`
    pub fn admit(&mut self, id: &ObjectId, version: u64) -> bool {
        match self.seen.get(id) {
            Some(&last) if version <= last => false,
            _ => {
                self.seen.insert(id.clone(), version);
                true
            }
        }
    }

    /// Stop tracking an object that no longer exists
    pub fn forget(&mut self, id: &ObjectId) {
        self.seen.remove(id);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectKind;

    #[test]
    fn test_replayed_and_stale_versions_are_dropped() {
        let mut dedup = Deduplicator::new();
        let id = ObjectId::new(ObjectKind::ResourceQuota, "team-a", "tenant-quota");

        assert!(dedup.admit(&id, 5));
        assert!(!dedup.admit(&id, 5));
        assert!(!dedup.admit(&id, 4));
        assert!(dedup.admit(&id, 6));
    }

    #[test]
    fn test_versions_are_tracked_per_object() {
        let mut dedup = Deduplicator::new();
        let quota = ObjectId::new(ObjectKind::ResourceQuota, "team-a", "tenant-quota");
        let role = ObjectId::new(ObjectKind::Role, "team-a", "tenant-role");

        assert!(dedup.admit(&quota, 5));
        assert!(dedup.admit(&role, 3));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_forgotten_object_is_no_longer_tracked() {
        let mut dedup = Deduplicator::new();
        let quota = ObjectId::new(ObjectKind::ResourceQuota, "team-a", "tenant-quota");
        dedup.admit(&quota, 7);

        dedup.forget(&quota);

        assert!(dedup.is_empty());
        // A recreated object is admitted again
        assert!(dedup.admit(&quota, 3));
    }
}
