// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cost record sink and its default durable implementation.

use crate::error::{QuotaKeeperError, Result};
use crate::persist::{read_json, write_json_atomic};
use crate::types::usage::UsageKey;
use crate::types::UsageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Where closed-window usage records go
#[async_trait]
pub trait CostRecordSink: Send + Sync {
    /// Store a batch; a record with an existing key replaces it
    async fn write(&self, records: Vec<UsageRecord>) -> Result<()>;
}

/// Keyed record store, optionally persisted as a JSON file
pub struct UsageStore {
    records: RwLock<BTreeMap<UsageKey, UsageRecord>>,
    path: Option<PathBuf>,
}

impl UsageStore {
    pub async fn open(path: Option<PathBuf>) -> Result<Self> {
        let mut records = BTreeMap::new();
        if let Some(path) = &path {
            let stored: Vec<UsageRecord> = read_json(path).await?.unwrap_or_default();
            records.extend(stored.into_iter().map(|r| (r.key(), r)));
            info!("Loaded {} usage records from {}", records.len(), path.display());
        }

        Ok(Self {
            records: RwLock::new(records),
            path,
        })
    }

    /// Records whose window ends after `since`, ordered by key
    pub async fn records_since(&self, since: DateTime<Utc>) -> Vec<UsageRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.window_end > since)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl CostRecordSink for UsageStore {
    async fn write(&self, batch: Vec<UsageRecord>) -> Result<()> {
        let mut records = self.records.write().await;
        let mut next = records.clone();

        for record in batch {
            let key = record.key();
            if let Some(clash) = next
                .values()
                .find(|existing| existing.key() != key && existing.overlaps(&record))
            {
                return Err(QuotaKeeperError::validation(
                    "non-overlapping windows",
                    format!(
                        "window {}..{} for {}/{} overlaps {}..{}",
                        record.window_start,
                        record.window_end,
                        record.namespace,
                        record.resource_name,
                        clash.window_start,
                        clash.window_end
                    ),
                ));
            }
            next.insert(key, record);
        }

        if let Some(path) = &self.path {
            let all: Vec<&UsageRecord> = next.values().collect();
            write_json_atomic(path, &all).await?;
        }
        debug!("Usage store holds {} records", next.len());
        *records = next;
        Ok(())
    }
}
