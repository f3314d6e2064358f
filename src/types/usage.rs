// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Usage telemetry samples and the cost records rolled up from them.

use crate::constants::resources;
use crate::types::objects::QuotaObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const GIB: f64 = (1u64 << 30) as f64;

/// One `{requested, used}` reading for a namespace and resource
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UsageSample {
    pub namespace: String,
    pub resource: String,
    pub requested: f64,
    pub used: f64,
    pub timestamp: DateTime<Utc>,
}

impl UsageSample {
    /// Derive cpu (cores), memory (GiB) and pod samples from a quota's status.
    /// `requested` is the quota's request ceiling, `used` what is currently reserved.
    pub fn from_quota(
        namespace: &str,
        quota: &QuotaObject,
        timestamp: DateTime<Utc>,
    ) -> Option<Vec<UsageSample>> {
        let used = quota.used.as_ref()?;
        let sample = |resource: &str, requested: f64, used: f64| UsageSample {
            namespace: namespace.to_string(),
            resource: resource.to_string(),
            requested,
            used,
            timestamp,
        };

        Some(vec![
            sample(
                resources::CPU,
                quota.hard.cpu_request.as_units(),
                used.cpu_request.as_units(),
            ),
            sample(
                resources::MEMORY,
                quota.hard.mem_request.as_units() / GIB,
                used.mem_request.as_units() / GIB,
            ),
            sample(
                resources::PODS,
                f64::from(quota.hard.pod_limit),
                f64::from(used.pods),
            ),
        ])
    }
}

/// Immutable cost-attribution fact for one namespace, resource and window
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub namespace: String,
    pub resource_name: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub requested: f64,
    pub used: f64,
    pub cost: f64,
}

impl UsageRecord {
    /// Identity under which a re-aggregated window replaces the previous record
    pub fn key(&self) -> UsageKey {
        UsageKey {
            namespace: self.namespace.clone(),
            resource_name: self.resource_name.clone(),
            window_start: self.window_start,
        }
    }

    pub fn overlaps(&self, other: &UsageRecord) -> bool {
        self.namespace == other.namespace
            && self.resource_name == other.resource_name
            && self.window_start < other.window_end
            && other.window_start < self.window_end
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsageKey {
    pub namespace: String,
    pub resource_name: String,
    pub window_start: DateTime<Utc>,
}
