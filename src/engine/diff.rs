// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pure desired-versus-observed comparison.

use crate::constants::names;
use crate::engine::plan::{Action, ReconciliationPlan};
use crate::types::objects::{
    BindingObject, LimitRangeObject, PolicyObject, QuotaObject, RoleObject, RoleRef, RoleRefKind,
};
use crate::types::{ManagedObject, ObjectId, ObjectKind, ObservedState, TenantSpec};
use std::collections::BTreeMap;

type Builder = fn(&TenantSpec) -> Vec<ManagedObject>;

/// What each kind contributes to a tenant's desired state, in apply order
const BUILDERS: [(ObjectKind, Builder); 6] = [
    (ObjectKind::Namespace, namespace),
    (ObjectKind::ResourceQuota, resource_quota),
    (ObjectKind::LimitRange, limit_range),
    (ObjectKind::Role, role),
    (ObjectKind::RoleBinding, role_bindings),
    (ObjectKind::NetworkPolicy, network_policies),
];

fn namespace(spec: &TenantSpec) -> Vec<ManagedObject> {
    vec![ManagedObject::Namespace {
        name: spec.id.clone(),
    }]
}

fn resource_quota(spec: &TenantSpec) -> Vec<ManagedObject> {
    vec![ManagedObject::ResourceQuota(QuotaObject {
        namespace: spec.id.clone(),
        name: names::QUOTA.to_string(),
        hard: spec.quota.clone(),
        used: None,
    })]
}

fn limit_range(spec: &TenantSpec) -> Vec<ManagedObject> {
    spec.limit_range
        .iter()
        .map(|defaults| {
            ManagedObject::LimitRange(LimitRangeObject {
                namespace: spec.id.clone(),
                name: names::LIMIT_RANGE.to_string(),
                defaults: defaults.clone(),
            })
        })
        .collect()
}

fn role(spec: &TenantSpec) -> Vec<ManagedObject> {
    if spec.rbac_rules.is_empty() {
        return Vec::new();
    }
    vec![ManagedObject::Role(RoleObject {
        namespace: spec.id.clone(),
        name: names::ROLE.to_string(),
        rules: spec.rule_set(),
    })]
}

fn role_bindings(spec: &TenantSpec) -> Vec<ManagedObject> {
    if spec.members.is_empty() {
        return Vec::new();
    }
    let binding = |name: String, kind: RoleRefKind, role: &str| {
        ManagedObject::RoleBinding(BindingObject {
            namespace: spec.id.clone(),
            name,
            role_ref: RoleRef {
                kind,
                name: role.to_string(),
            },
            subjects: spec.member_set(),
        })
    };

    let mut bindings = Vec::new();
    if !spec.rbac_rules.is_empty() {
        bindings.push(binding(names::ROLE_BINDING.to_string(), RoleRefKind::Role, names::ROLE));
    }
    for cluster_role in &spec.cluster_roles {
        bindings.push(binding(
            format!("{}{}", names::CLUSTER_ROLE_BINDING_PREFIX, cluster_role),
            RoleRefKind::ClusterRole,
            cluster_role,
        ));
    }
    bindings
}

fn network_policies(spec: &TenantSpec) -> Vec<ManagedObject> {
    spec.network_rules
        .iter()
        .map(|rule| {
            ManagedObject::NetworkPolicy(PolicyObject {
                namespace: spec.id.clone(),
                name: format!("{}{}", names::NETWORK_POLICY_PREFIX, rule.name),
                rule: rule.clone(),
            })
        })
        .collect()
}

/// Every object a tenant spec implies, keyed by identity
pub fn desired_objects(spec: &TenantSpec) -> BTreeMap<ObjectId, ManagedObject> {
    BUILDERS
        .iter()
        .flat_map(|(kind, build)| {
            let objects = build(spec);
            debug_assert!(objects.iter().all(|o| o.kind() == *kind));
            objects
        })
        .map(|o| (o.id(), o))
        .collect()
}

/// Compute the actions that move `observed` towards `spec`.
///
/// `spec = None` means the tenant is being offboarded and every observed
/// object is an extra. Extras are only deleted when `prune_extras` is set,
/// and adopted objects never are.
/// Identical inputs always yield identical plans.
pub fn compute_plan(
    tenant: &str,
    spec: Option<&TenantSpec>,
    observed: &ObservedState,
    prune_extras: bool,
) -> ReconciliationPlan {
    let desired = spec.map(desired_objects).unwrap_or_default();
    let mut actions = Vec::new();

    for (id, object) in &desired {
        match observed.get(id) {
            None => actions.push(Action::create(object.clone())),
            Some(live) if !object.satisfied_by(&live.object) => {
                actions.push(Action::update(object.clone(), &live.token))
            }
            Some(_) => {}
        }
    }

    if prune_extras {
        actions.extend(
            observed
                .objects
                .iter()
                .filter(|(id, live)| !desired.contains_key(id) && !live.adopted)
                .map(|(id, live)| Action::delete(id.clone(), &live.token)),
        );
    }

    ReconciliationPlan::new(tenant, actions)
}
