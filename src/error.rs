// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::objects::ObjectId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaKeeperError {
    /// Tenant spec breaks a validation rule; rejected synchronously, never retried
    #[error("Validation failed ({rule}): {detail}")]
    Validation { rule: &'static str, detail: String },

    #[error("Tenant not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency version mismatch; retried by re-diffing
    #[error("Version conflict on {0}")]
    Conflict(ObjectId),

    /// API unavailable or request failed; retried with backoff
    #[error("Transient cluster error: {0}")]
    TransientCluster(String),

    #[error("Tenant {tenant} degraded after {failures} consecutive failures: {last_error}")]
    DegradedTenant {
        tenant: String,
        failures: u32,
        last_error: String,
    },

    #[error("Deletion of {target} refused: {detail}")]
    OrphanDeletionRefused { target: ObjectId, detail: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

impl QuotaKeeperError {
    pub fn validation(rule: &'static str, detail: impl Into<String>) -> Self {
        Self::Validation {
            rule,
            detail: detail.into(),
        }
    }
}

impl From<std::io::Error> for QuotaKeeperError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuotaKeeperError>;
