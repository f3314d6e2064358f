// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The closed set of object kinds the operator manages inside a tenant namespace.

use crate::types::quantity::Quantity;
use crate::types::tenant::{LimitDefaults, NetworkRule, QuotaLimits, RbacRule, Subject};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Namespace,
    ResourceQuota,
    LimitRange,
    Role,
    RoleBinding,
    NetworkPolicy,
}

impl ObjectKind {
    /// Parents before children: creates and updates run in this order, deletes in reverse
    pub const APPLY_ORDER: [ObjectKind; 6] = [
        ObjectKind::Namespace,
        ObjectKind::ResourceQuota,
        ObjectKind::LimitRange,
        ObjectKind::Role,
        ObjectKind::RoleBinding,
        ObjectKind::NetworkPolicy,
    ];

    pub fn rank(&self) -> usize {
        Self::APPLY_ORDER
            .iter()
            .position(|k| k == self)
            .unwrap_or(Self::APPLY_ORDER.len())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Namespace => "Namespace",
            ObjectKind::ResourceQuota => "ResourceQuota",
            ObjectKind::LimitRange => "LimitRange",
            ObjectKind::Role => "Role",
            ObjectKind::RoleBinding => "RoleBinding",
            ObjectKind::NetworkPolicy => "NetworkPolicy",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a live object: (kind, namespace, name).
/// For namespaces, `namespace` and `name` are both the namespace name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self::new(ObjectKind::Namespace, name, name)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ObjectKind::Namespace {
            write!(f, "Namespace {}", self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoleRefKind {
    Role,
    ClusterRole,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleRef {
    pub kind: RoleRefKind,
    pub name: String,
}

/// Counters reported in a ResourceQuota's status
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub cpu_request: Quantity,
    pub cpu_limit: Quantity,
    pub mem_request: Quantity,
    pub mem_limit: Quantity,
    pub pods: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct QuotaObject {
    pub namespace: String,
    pub name: String,
    pub hard: QuotaLimits,
    /// Status counters; never part of the desired state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<QuotaUsage>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LimitRangeObject {
    pub namespace: String,
    pub name: String,
    pub defaults: LimitDefaults,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RoleObject {
    pub namespace: String,
    pub name: String,
    pub rules: BTreeSet<RbacRule>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BindingObject {
    pub namespace: String,
    pub name: String,
    pub role_ref: RoleRef,
    pub subjects: BTreeSet<Subject>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PolicyObject {
    pub namespace: String,
    pub name: String,
    pub rule: NetworkRule,
}

/// A managed object payload, tagged by kind
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum ManagedObject {
    Namespace { name: String },
    ResourceQuota(QuotaObject),
    LimitRange(LimitRangeObject),
    Role(RoleObject),
    RoleBinding(BindingObject),
    NetworkPolicy(PolicyObject),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::Namespace { .. } => ObjectKind::Namespace,
            ManagedObject::ResourceQuota(_) => ObjectKind::ResourceQuota,
            ManagedObject::LimitRange(_) => ObjectKind::LimitRange,
            ManagedObject::Role(_) => ObjectKind::Role,
            ManagedObject::RoleBinding(_) => ObjectKind::RoleBinding,
            ManagedObject::NetworkPolicy(_) => ObjectKind::NetworkPolicy,
        }
    }

    pub fn id(&self) -> ObjectId {
        match self {
            ManagedObject::Namespace { name } => ObjectId::namespace(name),
            ManagedObject::ResourceQuota(o) => ObjectId::new(self.kind(), &o.namespace, &o.name),
            ManagedObject::LimitRange(o) => ObjectId::new(self.kind(), &o.namespace, &o.name),
            ManagedObject::Role(o) => ObjectId::new(self.kind(), &o.namespace, &o.name),
            ManagedObject::RoleBinding(o) => ObjectId::new(self.kind(), &o.namespace, &o.name),
            ManagedObject::NetworkPolicy(o) => ObjectId::new(self.kind(), &o.namespace, &o.name),
        }
    }

    /// Whether the live object already satisfies this desired object.
    ///
    /// Quotas compare field by field (by quantity value), rule-bearing kinds
    /// compare as sets. Status fields never participate.
    pub fn satisfied_by(&self, live: &ManagedObject) -> bool {
        match (self, live) {
            (ManagedObject::Namespace { name: a }, ManagedObject::Namespace { name: b }) => a == b,
            (ManagedObject::ResourceQuota(a), ManagedObject::ResourceQuota(b)) => a.hard == b.hard,
            (ManagedObject::LimitRange(a), ManagedObject::LimitRange(b)) => a.defaults == b.defaults,
            (ManagedObject::Role(a), ManagedObject::Role(b)) => a.rules == b.rules,
            (ManagedObject::RoleBinding(a), ManagedObject::RoleBinding(b)) => {
                a.role_ref == b.role_ref && a.subjects == b.subjects
            }
            (ManagedObject::NetworkPolicy(a), ManagedObject::NetworkPolicy(b)) => a.rule == b.rule,
            _ => false,
        }
    }

    /// Quota status counters, if this is a quota that reports them
    pub fn quota_usage(&self) -> Option<(&QuotaLimits, &QuotaUsage)> {
        match self {
            ManagedObject::ResourceQuota(q) => q.used.as_ref().map(|u| (&q.hard, u)),
            _ => None,
        }
    }
}

/// A live object together with the version the API server reported for it
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObservedObject {
    pub object: ManagedObject,
    /// Numeric form of the resource version, for ordering and deduplication
    pub version: u64,
    /// Opaque token sent back on updates for optimistic concurrency
    pub token: String,
    /// Existed before the tenant was registered; updated but never deleted
    #[serde(default)]
    pub adopted: bool,
}

impl ObservedObject {
    pub fn new(object: ManagedObject, token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            object,
            version: parse_version(&token),
            token,
            adopted: false,
        }
    }

    pub fn adopted(mut self) -> Self {
        self.adopted = true;
        self
    }
}

/// Resource versions are opaque, but etcd-backed servers hand out integers
pub fn parse_version(token: &str) -> u64 {
    token.parse().unwrap_or(0)
}
