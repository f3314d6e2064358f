// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Translation between managed-object payloads and Kubernetes API types.

use crate::constants::{labels, names, OPERATOR_NAME};
use crate::error::Result;
use crate::types::objects::{
    BindingObject, LimitRangeObject, PolicyObject, QuotaObject, QuotaUsage, RoleObject, RoleRef,
    RoleRefKind,
};
use crate::types::quantity::Quantity;
use crate::types::tenant::{Direction, LimitDefaults, NetworkRule, QuotaLimits, RbacRule, Subject, SubjectKind};
use crate::types::{ManagedObject, ObservedObject};
use k8s_openapi::api::core::v1::{
    LimitRange, LimitRangeItem, LimitRangeSpec, Namespace, ResourceQuota, ResourceQuotaSpec,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{
    PolicyRule, Role, RoleBinding, RoleRef as K8sRoleRef, Subject as K8sSubject,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

mod keys {
    pub const LIMITS_CPU: &str = "limits.cpu";
    pub const LIMITS_MEMORY: &str = "limits.memory";
    pub const REQUESTS_CPU: &str = "requests.cpu";
    pub const REQUESTS_MEMORY: &str = "requests.memory";
    pub const PODS: &str = "pods";
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
}

/// Labels stamped on every managed object of a tenant
pub fn managed_labels(tenant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (labels::TENANT.to_string(), tenant.to_string()),
    ])
}

fn meta(name: &str, namespace: Option<&str>, token: Option<&str>) -> ObjectMeta {
    let tenant = namespace.unwrap_or(name);
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(managed_labels(tenant)),
        resource_version: token.map(str::to_string),
        ..Default::default()
    }
}

fn token_of(metadata: &ObjectMeta) -> String {
    metadata.resource_version.clone().unwrap_or_default()
}

fn q(value: &Quantity) -> K8sQuantity {
    K8sQuantity(value.as_str().to_string())
}

/// Parse an entry of a quantity map, treating absent or malformed values as zero
fn quantity_at(map: Option<&BTreeMap<String, K8sQuantity>>, key: &str) -> Quantity {
    map.and_then(|m| m.get(key))
        .and_then(|v| v.0.parse().ok())
        .unwrap_or_default()
}

fn count_at(map: Option<&BTreeMap<String, K8sQuantity>>, key: &str) -> u32 {
    u32::try_from(quantity_at(map, key).milli() / 1000).unwrap_or(0)
}

// =============================================================================
// Namespace
// =============================================================================

pub fn namespace_to_k8s(name: &str, token: Option<&str>) -> Namespace {
    Namespace {
        metadata: meta(name, None, token),
        ..Default::default()
    }
}

/// Namespaces without our managed-by label predate the tenant and are adopted
pub fn namespace_from_k8s(ns: &Namespace) -> ObservedObject {
    let observed = ObservedObject::new(
        ManagedObject::Namespace {
            name: ns.name_any(),
        },
        token_of(&ns.metadata),
    );
    let ours = ns
        .labels()
        .get(labels::MANAGED_BY)
        .is_some_and(|v| v == OPERATOR_NAME);
    if ours {
        observed
    } else {
        observed.adopted()
    }
}

// =============================================================================
// ResourceQuota
// =============================================================================

pub fn quota_to_k8s(quota: &QuotaObject, token: Option<&str>) -> ResourceQuota {
    let hard = BTreeMap::from([
        (keys::LIMITS_CPU.to_string(), q(&quota.hard.cpu_limit)),
        (keys::LIMITS_MEMORY.to_string(), q(&quota.hard.mem_limit)),
        (keys::REQUESTS_CPU.to_string(), q(&quota.hard.cpu_request)),
        (keys::REQUESTS_MEMORY.to_string(), q(&quota.hard.mem_request)),
        (keys::PODS.to_string(), K8sQuantity(quota.hard.pod_limit.to_string())),
    ]);

    ResourceQuota {
        metadata: meta(&quota.name, Some(&quota.namespace), token),
        spec: Some(ResourceQuotaSpec {
            hard: Some(hard),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn quota_from_k8s(rq: &ResourceQuota) -> ObservedObject {
    let hard = rq.spec.as_ref().and_then(|s| s.hard.as_ref());
    let used = rq
        .status
        .as_ref()
        .and_then(|s| s.used.as_ref())
        .map(|used| QuotaUsage {
            cpu_request: quantity_at(Some(used), keys::REQUESTS_CPU),
            cpu_limit: quantity_at(Some(used), keys::LIMITS_CPU),
            mem_request: quantity_at(Some(used), keys::REQUESTS_MEMORY),
            mem_limit: quantity_at(Some(used), keys::LIMITS_MEMORY),
            pods: count_at(Some(used), keys::PODS),
        });

    let quota = QuotaObject {
        namespace: rq.namespace().unwrap_or_default(),
        name: rq.name_any(),
        hard: QuotaLimits {
            cpu_limit: quantity_at(hard, keys::LIMITS_CPU),
            mem_limit: quantity_at(hard, keys::LIMITS_MEMORY),
            cpu_request: quantity_at(hard, keys::REQUESTS_CPU),
            mem_request: quantity_at(hard, keys::REQUESTS_MEMORY),
            pod_limit: count_at(hard, keys::PODS),
        },
        used,
    };
    ObservedObject::new(ManagedObject::ResourceQuota(quota), token_of(&rq.metadata))
}

// =============================================================================
// LimitRange
// =============================================================================

pub fn limit_range_to_k8s(lr: &LimitRangeObject, token: Option<&str>) -> LimitRange {
    let d = &lr.defaults;
    LimitRange {
        metadata: meta(&lr.name, Some(&lr.namespace), token),
        spec: Some(LimitRangeSpec {
            limits: vec![LimitRangeItem {
                type_: "Container".to_string(),
                default: Some(BTreeMap::from([
                    (keys::CPU.to_string(), q(&d.default_cpu_limit)),
                    (keys::MEMORY.to_string(), q(&d.default_mem_limit)),
                ])),
                default_request: Some(BTreeMap::from([
                    (keys::CPU.to_string(), q(&d.default_cpu_request)),
                    (keys::MEMORY.to_string(), q(&d.default_mem_request)),
                ])),
                ..Default::default()
            }],
        }),
    }
}

pub fn limit_range_from_k8s(lr: &LimitRange) -> ObservedObject {
    let item = lr
        .spec
        .as_ref()
        .and_then(|s| s.limits.iter().find(|l| l.type_ == "Container"));
    let default = item.and_then(|i| i.default.as_ref());
    let default_request = item.and_then(|i| i.default_request.as_ref());

    let object = LimitRangeObject {
        namespace: lr.namespace().unwrap_or_default(),
        name: lr.name_any(),
        defaults: LimitDefaults {
            default_cpu_request: quantity_at(default_request, keys::CPU),
            default_mem_request: quantity_at(default_request, keys::MEMORY),
            default_cpu_limit: quantity_at(default, keys::CPU),
            default_mem_limit: quantity_at(default, keys::MEMORY),
        },
    };
    ObservedObject::new(ManagedObject::LimitRange(object), token_of(&lr.metadata))
}

// =============================================================================
// RBAC
// =============================================================================

pub fn role_to_k8s(role: &RoleObject, token: Option<&str>) -> Role {
    Role {
        metadata: meta(&role.name, Some(&role.namespace), token),
        rules: Some(
            role.rules
                .iter()
                .map(|r| PolicyRule {
                    api_groups: Some(r.api_groups.iter().cloned().collect()),
                    resources: Some(r.resources.iter().cloned().collect()),
                    verbs: r.verbs.iter().cloned().collect(),
                    ..Default::default()
                })
                .collect(),
        ),
    }
}

pub fn role_from_k8s(role: &Role) -> ObservedObject {
    let rules = role
        .rules
        .iter()
        .flatten()
        .map(|r| RbacRule {
            api_groups: r.api_groups.iter().flatten().cloned().collect(),
            resources: r.resources.iter().flatten().cloned().collect(),
            verbs: r.verbs.iter().cloned().collect(),
        })
        .collect();

    let object = RoleObject {
        namespace: role.namespace().unwrap_or_default(),
        name: role.name_any(),
        rules,
    };
    ObservedObject::new(ManagedObject::Role(object), token_of(&role.metadata))
}

pub fn binding_to_k8s(binding: &BindingObject, token: Option<&str>) -> RoleBinding {
    let kind = match binding.role_ref.kind {
        RoleRefKind::Role => "Role",
        RoleRefKind::ClusterRole => "ClusterRole",
    };
    let subjects = binding
        .subjects
        .iter()
        .map(|s| match s.kind {
            SubjectKind::ServiceAccount => K8sSubject {
                kind: s.kind.as_str().to_string(),
                name: s.name.clone(),
                namespace: Some(binding.namespace.clone()),
                api_group: None,
            },
            SubjectKind::User | SubjectKind::Group => K8sSubject {
                kind: s.kind.as_str().to_string(),
                name: s.name.clone(),
                namespace: None,
                api_group: Some(RBAC_GROUP.to_string()),
            },
        })
        .collect();

    RoleBinding {
        metadata: meta(&binding.name, Some(&binding.namespace), token),
        role_ref: K8sRoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: kind.to_string(),
            name: binding.role_ref.name.clone(),
        },
        subjects: Some(subjects),
    }
}

pub fn binding_from_k8s(rb: &RoleBinding) -> ObservedObject {
    let kind = if rb.role_ref.kind == "ClusterRole" {
        RoleRefKind::ClusterRole
    } else {
        RoleRefKind::Role
    };
    let subjects = rb
        .subjects
        .iter()
        .flatten()
        .filter_map(|s| {
            SubjectKind::parse(&s.kind).map(|kind| Subject {
                kind,
                name: s.name.clone(),
            })
        })
        .collect();

    let object = BindingObject {
        namespace: rb.namespace().unwrap_or_default(),
        name: rb.name_any(),
        role_ref: RoleRef {
            kind,
            name: rb.role_ref.name.clone(),
        },
        subjects,
    };
    ObservedObject::new(ManagedObject::RoleBinding(object), token_of(&rb.metadata))
}

// =============================================================================
// NetworkPolicy
// =============================================================================

pub fn policy_to_k8s(policy: &PolicyObject, token: Option<&str>) -> Result<NetworkPolicy> {
    let rule = &policy.rule;
    let peers: Vec<Value> = rule
        .namespaces
        .iter()
        .map(|ns| json!({ "namespaceSelector": { "matchLabels": { NAMESPACE_NAME_LABEL: ns } } }))
        .chain(rule.cidrs.iter().map(|cidr| json!({ "ipBlock": { "cidr": cidr } })))
        .collect();
    let ports: Vec<Value> = rule
        .ports
        .iter()
        .map(|p| json!({ "protocol": "TCP", "port": p }))
        .collect();

    let (direction, peer_key) = match rule.direction {
        Direction::Ingress => ("Ingress", "from"),
        Direction::Egress => ("Egress", "to"),
    };
    let mut entry = serde_json::Map::new();
    if !peers.is_empty() {
        entry.insert(peer_key.to_string(), Value::Array(peers));
    }
    if !ports.is_empty() {
        entry.insert("ports".to_string(), Value::Array(ports));
    }

    let mut spec = json!({
        "podSelector": {},
        "policyTypes": [direction],
    });
    spec[direction.to_lowercase()] = json!([Value::Object(entry)]);

    let mut np: NetworkPolicy = serde_json::from_value(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": {},
        "spec": spec,
    }))?;
    np.metadata = meta(&policy.name, Some(&policy.namespace), token);
    Ok(np)
}

pub fn policy_from_k8s(np: &NetworkPolicy) -> Result<ObservedObject> {
    let value = serde_json::to_value(np)?;
    let spec = &value["spec"];
    let direction = match spec["policyTypes"][0].as_str() {
        Some("Egress") => Direction::Egress,
        _ => Direction::Ingress,
    };
    let (rules_key, peer_key) = match direction {
        Direction::Ingress => ("ingress", "from"),
        Direction::Egress => ("egress", "to"),
    };
    let entry = &spec[rules_key][0];

    let mut namespaces = BTreeSet::new();
    let mut cidrs = BTreeSet::new();
    for peer in entry[peer_key].as_array().into_iter().flatten() {
        if let Some(ns) = peer["namespaceSelector"]["matchLabels"][NAMESPACE_NAME_LABEL].as_str() {
            namespaces.insert(ns.to_string());
        }
        if let Some(cidr) = peer["ipBlock"]["cidr"].as_str() {
            cidrs.insert(cidr.to_string());
        }
    }
    let ports = entry["ports"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|p| p["port"].as_u64())
        .filter_map(|p| u16::try_from(p).ok())
        .collect();

    let name = np.name_any();
    let rule = NetworkRule {
        name: name
            .strip_prefix(names::NETWORK_POLICY_PREFIX)
            .unwrap_or(&name)
            .to_string(),
        direction,
        namespaces,
        cidrs,
        ports,
    };
    let object = PolicyObject {
        namespace: np.namespace().unwrap_or_default(),
        name,
        rule,
    };
    Ok(ObservedObject::new(
        ManagedObject::NetworkPolicy(object),
        token_of(&np.metadata),
    ))
}
