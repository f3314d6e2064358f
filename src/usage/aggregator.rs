// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::registry::TenantRegistry;
use crate::types::{UsageRecord, UsageSample};
use crate::usage::pricing::Pricing;
use crate::usage::store::CostRecordSink;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, instrument, warn};

/// Handle for pushing usage samples to the aggregator
#[derive(Clone)]
pub struct AggregatorHandle {
    sample_tx: mpsc::Sender<Vec<UsageSample>>,
}

impl AggregatorHandle {
    pub async fn record(&self, samples: Vec<UsageSample>) {
        if let Err(e) = self.sample_tx.send(samples).await {
            error!("Failed to send usage samples to aggregator: {}", e);
        }
    }
}

pub fn usage_channel() -> (AggregatorHandle, mpsc::Receiver<Vec<UsageSample>>) {
    let (sample_tx, sample_rx) = mpsc::channel(256);
    (AggregatorHandle { sample_tx }, sample_rx)
}

/// The epoch-aligned `[start, end)` window of length `period` holding `t`
pub fn window_containing(t: DateTime<Utc>, period: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let secs = period.num_seconds().max(1);
    let start_secs = t.timestamp().div_euclid(secs) * secs;
    let start = DateTime::from_timestamp(start_secs, 0).unwrap_or(t);
    (start, start + Duration::seconds(secs))
}

/// One record per namespace and resource: mean requested and used, priced over the window
pub fn roll_up(
    samples: &[UsageSample],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    pricing: &dyn Pricing,
) -> Vec<UsageRecord> {
    let mut sums: BTreeMap<(&str, &str), (f64, f64, u32)> = BTreeMap::new();
    for sample in samples {
        let entry = sums
            .entry((sample.namespace.as_str(), sample.resource.as_str()))
            .or_default();
        entry.0 += sample.requested;
        entry.1 += sample.used;
        entry.2 += 1;
    }

    sums.into_iter()
        .map(|((namespace, resource), (requested, used, count))| {
            let n = f64::from(count);
            let used = used / n;
            UsageRecord {
                namespace: namespace.to_string(),
                resource_name: resource.to_string(),
                window_start: start,
                window_end: end,
                requested: requested / n,
                used,
                cost: pricing.cost(resource, used, end - start),
            }
        })
        .collect()
}

/// Closes one window per period and writes its records to the sink
pub struct UsageAggregator {
    cluster: Arc<dyn ClusterApi>,
    registry: Arc<TenantRegistry>,
    sink: Arc<dyn CostRecordSink>,
    pricing: Arc<dyn Pricing>,
    period: Duration,
    sample_rx: mpsc::Receiver<Vec<UsageSample>>,
    shutdown: watch::Receiver<bool>,
    buffer: Vec<UsageSample>,
}

impl UsageAggregator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        registry: Arc<TenantRegistry>,
        sink: Arc<dyn CostRecordSink>,
        pricing: Arc<dyn Pricing>,
        period: std::time::Duration,
        sample_rx: mpsc::Receiver<Vec<UsageSample>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let secs = i64::try_from(period.as_secs()).unwrap_or(i64::MAX).max(1);
        Self {
            cluster,
            registry,
            sink,
            pricing,
            period: Duration::seconds(secs),
            sample_rx,
            shutdown,
            buffer: Vec::new(),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Usage aggregator started, period {}s", self.period.num_seconds());
        let mut samples_open = true;

        loop {
            let now = Utc::now();
            let (start, end) = window_containing(now, self.period);
            let deadline = Instant::now() + (end - now).to_std().unwrap_or_default();

            loop {
                tokio::select! {
                    _ = self.shutdown.changed() => return Ok(()),
                    batch = self.sample_rx.recv(), if samples_open => match batch {
                        Some(batch) => self.buffer.extend(batch),
                        None => samples_open = false,
                    },
                    _ = sleep_until(deadline) => break,
                }
            }

            if let Err(e) = self.close_window(start, end).await {
                error!("Failed to write usage for window {}..{}: {}", start, end, e);
            }
        }
    }

    /// Aggregate and write the window `[start, end)`; returns the number of records written.
    ///
    /// Buffered samples are topped up with a fresh pull from every tenant
    /// namespace. Closing the same window twice overwrites the first result.
    #[instrument(skip(self))]
    pub async fn close_window(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<usize> {
        while let Ok(batch) = self.sample_rx.try_recv() {
            self.buffer.extend(batch);
        }
        let (mut samples, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buffer)
            .into_iter()
            .filter(|s| s.timestamp >= start)
            .partition(|s| s.timestamp < end);
        self.buffer = later;

        for spec in self.registry.list().await {
            match self.cluster.observe(&spec.id).await {
                Ok(state) => samples.extend(state.usage_samples()),
                Err(e) => warn!("Failed to sample usage of tenant {}: {}", spec.id, e),
            }
        }

        let records = roll_up(&samples, start, end, self.pricing.as_ref());

        // Shutdown is only honoured before the write starts
        if *self.shutdown.borrow() {
            info!("Shutting down, window {}..{} not written", start, end);
            return Ok(0);
        }

        let count = records.len();
        self.sink.write(records).await?;
        info!("Wrote {} usage records from {} samples", count, samples.len());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionGuard;
    use crate::constants::names;
    use crate::engine::engine_channel;
    use crate::test_utils::FakeCluster;
    use crate::types::objects::{QuotaObject, QuotaUsage};
    use crate::types::tenant::fixtures::{quota, tenant};
    use crate::types::ManagedObject;
    use crate::usage::pricing::UnitPricing;
    use crate::usage::store::UsageStore;
    use chrono::TimeZone;

    fn day() -> Duration {
        Duration::days(1)
    }

    fn sample(ns: &str, resource: &str, used: f64, at: DateTime<Utc>) -> UsageSample {
        UsageSample {
            namespace: ns.to_string(),
            resource: resource.to_string(),
            requested: 2.0,
            used,
            timestamp: at,
        }
    }

    fn quota_with_usage(ns: &str, cpu_used: &str) -> ManagedObject {
        ManagedObject::ResourceQuota(QuotaObject {
            namespace: ns.to_string(),
            name: names::QUOTA.to_string(),
            hard: quota("4", "8Gi", "2", "4Gi"),
            used: Some(QuotaUsage {
                cpu_request: cpu_used.parse().unwrap(),
                mem_request: "1Gi".parse().unwrap(),
                pods: 2,
                ..Default::default()
            }),
        })
    }

    struct Fixture {
        cluster: Arc<FakeCluster>,
        store: Arc<UsageStore>,
        handle: AggregatorHandle,
        shutdown: watch::Sender<bool>,
        aggregator: UsageAggregator,
    }

    async fn fixture() -> Fixture {
        let cluster = Arc::new(FakeCluster::new());
        let (engine, _rx) = engine_channel();
        let registry = Arc::new(
            TenantRegistry::open(AdmissionGuard::new("kube-"), None, engine)
                .await
                .unwrap(),
        );
        registry.put(tenant("team-a")).await.unwrap();
        let store = Arc::new(UsageStore::open(None).await.unwrap());
        let (handle, sample_rx) = usage_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pricing = UnitPricing {
            cpu_per_hour: 0.05,
            memory_gib_per_hour: 0.01,
            pod_per_hour: 0.0,
        };

        let aggregator = UsageAggregator::new(
            cluster.clone(),
            registry,
            store.clone(),
            Arc::new(pricing),
            std::time::Duration::from_secs(86_400),
            sample_rx,
            shutdown_rx,
        );

        Fixture {
            cluster,
            store,
            handle,
            shutdown,
            aggregator,
        }
    }

    #[test]
    fn test_windows_are_epoch_aligned() {
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 17, 30, 0).unwrap();

        let (start, end) = window_containing(t, day());

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_roll_up_averages_per_namespace_and_resource() {
        let (start, end) = window_containing(Utc::now(), day());
        let samples = vec![
            sample("team-a", "cpu", 1.0, start),
            sample("team-a", "cpu", 2.0, start),
            sample("team-b", "cpu", 4.0, start),
        ];

        let records = roll_up(&samples, start, end, &UnitPricing::default());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].namespace, "team-a");
        assert_eq!(records[0].used, 1.5);
        assert_eq!(records[0].requested, 2.0);
        assert_eq!(records[1].used, 4.0);
    }

    #[tokio::test]
    async fn test_closing_window_twice_keeps_one_record_per_key() {
        let mut f = fixture().await;
        f.cluster.insert(ManagedObject::Namespace {
            name: "team-a".to_string(),
        });
        f.cluster.insert(quota_with_usage("team-a", "1"));
        let (start, end) = window_containing(Utc::now(), day());

        assert_eq!(f.aggregator.close_window(start, end).await.unwrap(), 3);
        f.cluster.insert(quota_with_usage("team-a", "1500m"));
        f.aggregator.close_window(start, end).await.unwrap();

        let records = f.store.records_since(start).await;
        assert_eq!(records.len(), 3);
        let cpu = records.iter().find(|r| r.resource_name == "cpu").unwrap();
        assert_eq!(cpu.used, 1.5);
        assert!((cpu.cost - 1.5 * 0.05 * 24.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_pushed_samples_are_aggregated_by_window() {
        let mut f = fixture().await;
        let (start, end) = window_containing(Utc::now(), day());
        f.handle
            .record(vec![
                sample("team-c", "pods", 3.0, start),
                sample("team-c", "pods", 5.0, end),
            ])
            .await;

        f.aggregator.close_window(start, end).await.unwrap();

        let records = f.store.records_since(start).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].used, 3.0);

        // The later sample waits for its own window
        f.aggregator.close_window(end, end + day()).await.unwrap();
        assert_eq!(f.store.len().await, 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_write_discards_window() {
        let mut f = fixture().await;
        let (start, end) = window_containing(Utc::now(), day());
        f.handle.record(vec![sample("team-a", "cpu", 1.0, start)]).await;
        f.shutdown.send(true).unwrap();

        assert_eq!(f.aggregator.close_window(start, end).await.unwrap(), 0);
        assert_eq!(f.store.len().await, 0);
    }
}
