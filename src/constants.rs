// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Labels stamped on every object the operator manages
pub mod labels {
    /// Standard managed-by label, value is [`super::OPERATOR_NAME`]
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    /// Tenant id that owns the object
    pub const TENANT: &str = "quotakeeper.io/tenant";
}

/// The operator name used for server-side apply and the managed-by label
pub const OPERATOR_NAME: &str = "quotakeeper";

/// Default prefix reserved for system namespaces
pub const DEFAULT_RESERVED_PREFIX: &str = "kube-";

/// Fixed object names inside a tenant namespace
pub mod names {
    pub const QUOTA: &str = "tenant-quota";
    pub const LIMIT_RANGE: &str = "tenant-limits";
    pub const ROLE: &str = "tenant-role";
    pub const ROLE_BINDING: &str = "tenant-binding";
    /// Prefix for bindings of shared ClusterRoles, suffixed with the role name
    pub const CLUSTER_ROLE_BINDING_PREFIX: &str = "tenant-cr-";
    /// Prefix for network policies, suffixed with the rule name
    pub const NETWORK_POLICY_PREFIX: &str = "tenant-net-";
}

/// Retry policy for tenant reconciliation
pub mod backoff {
    pub const BASE_MS: u64 = 1_000;
    pub const CAP_SECS: u64 = 300;
    /// Retries allowed after the first failure before a tenant is degraded
    pub const MAX_RETRIES: u32 = 10;
    /// Version conflicts absorbed by re-diffing within one pass
    pub const MAX_CONFLICT_RETRIES: u32 = 3;
}

/// API discovery polling configuration
pub mod discovery {
    /// Initial polling interval in seconds when waiting for API groups
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
    /// Groups that must be served before reconcilers start
    pub const REQUIRED_GROUPS: &[&str] = &["rbac.authorization.k8s.io", "networking.k8s.io"];
}

/// Resource names used in usage records
pub mod resources {
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
    pub const PODS: &str = "pods";
}
