// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::cluster::{ClusterApi, WatchEvent};
use crate::engine::{EngineEvent, EngineHandle};
use crate::observer::ObservedChange;
use crate::types::{ManagedObject, ObjectId, ObservedObject, UsageSample};
use crate::usage::AggregatorHandle;
use chrono::Utc;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Pause before re-opening a watch stream that ended
const REWATCH_DELAY: Duration = Duration::from_secs(5);

/// Last version seen for every live managed object.
///
/// Keeps emitted versions non-decreasing per object and turns relists into
/// the changes a watch would have delivered.
#[derive(Debug, Default)]
pub struct ObjectTracker {
    live: HashMap<ObjectId, u64>,
}

impl ObjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one watch event, dropping it if it is not newer than what we have
    pub fn apply_event(&mut self, event: WatchEvent) -> Option<ObservedChange> {
        match event {
            WatchEvent::Applied(observed) => self.applied(observed),
            WatchEvent::Deleted { id, version } => {
                let last = self.live.remove(&id)?;
                Some(ObservedChange {
                    id,
                    version: version.max(last + 1),
                    object: None,
                })
            }
        }
    }

    fn applied(&mut self, observed: ObservedObject) -> Option<ObservedChange> {
        let id = observed.object.id();
        if matches!(self.live.get(&id), Some(&last) if observed.version <= last) {
            return None;
        }
        self.live.insert(id.clone(), observed.version);
        Some(ObservedChange {
            id,
            version: observed.version,
            object: Some(observed.object),
        })
    }

    /// Diff a full listing against what we track: changes for new or advanced
    /// objects, tombstones at `last + 1` for objects that vanished.
    pub fn reconcile_listing(&mut self, listing: Vec<ObservedObject>) -> Vec<ObservedChange> {
        let listed: HashSet<ObjectId> = listing.iter().map(|o| o.object.id()).collect();
        let mut changes: Vec<ObservedChange> = listing
            .into_iter()
            .filter_map(|o| self.applied(o))
            .collect();

        let mut vanished: Vec<ObjectId> = self
            .live
            .keys()
            .filter(|id| !listed.contains(*id))
            .cloned()
            .collect();
        vanished.sort();
        for id in vanished {
            if let Some(last) = self.live.remove(&id) {
                changes.push(ObservedChange {
                    id,
                    version: last + 1,
                    object: None,
                });
            }
        }
        changes
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Watches managed objects and forwards changes to the engine and quota
/// usage to the aggregator.
pub struct ClusterObserver {
    cluster: Arc<dyn ClusterApi>,
    engine: EngineHandle,
    usage: AggregatorHandle,
    tracker: ObjectTracker,
    resync_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ClusterObserver {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        engine: EngineHandle,
        usage: AggregatorHandle,
        resync_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cluster,
            engine,
            usage,
            tracker: ObjectTracker::new(),
            resync_interval,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Cluster observer started");
        self.relist().await;
        let mut stream = self.cluster.watch();

        let mut resync = tokio::time::interval(self.resync_interval);
        resync.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = resync.tick() => self.relist().await,
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if let Some(change) = self.tracker.apply_event(event) {
                            self.forward(change).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Watch error, relisting: {}", e);
                        self.relist().await;
                    }
                    None => {
                        warn!("Watch stream ended, relisting and re-watching");
                        tokio::select! {
                            _ = self.shutdown.changed() => break,
                            _ = tokio::time::sleep(REWATCH_DELAY) => {}
                        }
                        self.relist().await;
                        stream = self.cluster.watch();
                    }
                },
            }
        }

        info!("Cluster observer stopped");
        Ok(())
    }

    /// Full listing to recover anything a broken watch may have missed
    #[instrument(skip(self))]
    async fn relist(&mut self) {
        let listing = match self.cluster.list_managed().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Failed to list managed objects: {}", e);
                return;
            }
        };

        let changes = self.tracker.reconcile_listing(listing);
        debug!("Relist produced {} changes", changes.len());
        for change in changes {
            self.forward(change).await;
        }
    }

    async fn forward(&self, change: ObservedChange) {
        if let Some(ManagedObject::ResourceQuota(quota)) = &change.object {
            if let Some(samples) = UsageSample::from_quota(&quota.namespace, quota, Utc::now()) {
                self.usage.record(samples).await;
            }
        }
        self.engine.send(EngineEvent::ObservedChanged(change)).await;
    }
}
