// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Desired-state tenant records held by the registry.

use crate::types::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Desired state of one tenant namespace
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Namespace name, unique across the registry
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub quota: QuotaLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_range: Option<LimitDefaults>,
    #[serde(default)]
    pub rbac_rules: Vec<RbacRule>,
    #[serde(default)]
    pub members: Vec<Subject>,
    /// Shared ClusterRoles bound into the tenant namespace
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    #[serde(default)]
    pub network_rules: Vec<NetworkRule>,
}

/// Aggregate ceilings enforced by the tenant's ResourceQuota
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaLimits {
    pub cpu_limit: Quantity,
    pub mem_limit: Quantity,
    pub cpu_request: Quantity,
    pub mem_request: Quantity,
    pub pod_limit: u32,
}

/// Per-container defaults materialized as a LimitRange
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimitDefaults {
    pub default_cpu_request: Quantity,
    pub default_mem_request: Quantity,
    pub default_cpu_limit: Quantity,
    pub default_mem_limit: Quantity,
}

/// One RBAC policy rule; compared as a set member, so field order is irrelevant
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct RbacRule {
    #[serde(default)]
    pub api_groups: BTreeSet<String>,
    pub resources: BTreeSet<String>,
    pub verbs: BTreeSet<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::Group => "Group",
            SubjectKind::ServiceAccount => "ServiceAccount",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "User" => Some(SubjectKind::User),
            "Group" => Some(SubjectKind::Group),
            "ServiceAccount" => Some(SubjectKind::ServiceAccount),
            _ => None,
        }
    }
}

/// A user, group or service account granted the tenant role
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Ingress,
    Egress,
}

/// A named network rule, materialized as one NetworkPolicy in the tenant namespace
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRule {
    pub name: String,
    pub direction: Direction,
    /// Peer namespaces, matched by `kubernetes.io/metadata.name`
    #[serde(default)]
    pub namespaces: BTreeSet<String>,
    #[serde(default)]
    pub cidrs: BTreeSet<String>,
    /// TCP ports; empty means all ports
    #[serde(default)]
    pub ports: BTreeSet<u16>,
}

impl TenantSpec {
    /// RBAC rules as a set, so spec order never causes drift
    pub fn rule_set(&self) -> BTreeSet<RbacRule> {
        self.rbac_rules.iter().cloned().collect()
    }

    pub fn member_set(&self) -> BTreeSet<Subject> {
        self.members.iter().cloned().collect()
    }

    /// Whether this tenant binds the given shared ClusterRole
    pub fn references_cluster_role(&self, role: &str) -> bool {
        self.cluster_roles.iter().any(|r| r == role)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_deserialize_camel_case_spec() {
        let spec: TenantSpec = serde_json::from_value(serde_json::json!({
            "id": "team-a",
            "quota": {
                "cpuLimit": "4",
                "memLimit": "8Gi",
                "cpuRequest": "2",
                "memRequest": "4Gi",
                "podLimit": 10
            }
        }))
        .unwrap();

        assert_eq!(spec, tenant("team-a").clone_with_description(""));
    }

    #[test]
    fn test_rule_set_is_order_independent() {
        let mut a = full_tenant("team-a");
        let b = a.clone();
        a.rbac_rules.reverse();

        assert_eq!(a.rule_set(), b.rule_set());
    }

    #[test]
    fn test_references_cluster_role() {
        let mut spec = tenant("team-a");
        spec.cluster_roles = vec!["view".to_string()];

        assert!(spec.references_cluster_role("view"));
        assert!(!spec.references_cluster_role("edit"));
    }

    impl TenantSpec {
        fn clone_with_description(&self, description: &str) -> Self {
            Self {
                description: description.to_string(),
                ..self.clone()
            }
        }
    }
}
