// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Synchronous gate run before tenant-affecting mutations.

use crate::error::QuotaKeeperError;
use crate::types::objects::{ManagedObject, RoleRefKind};
use crate::types::quantity::Quantity;
use crate::types::{ObjectId, ObjectKind, TenantSpec};
use std::collections::HashSet;
use std::fmt;

/// Rules the guard enforces, named in every refusal
pub mod rules {
    pub const RESERVED_PREFIX: &str = "reserved prefix";
    pub const NAMESPACE_NAME: &str = "namespace name";
    pub const CPU_ORDERING: &str = "cpu request exceeds limit";
    pub const MEMORY_ORDERING: &str = "memory request exceeds limit";
    pub const LIMIT_DEFAULTS: &str = "limit defaults ordering";
    pub const NEGATIVE_QUANTITY: &str = "non-negative quantity";
    pub const DUPLICATE_RULE: &str = "duplicate network rule";
    pub const EMPTY_RULE: &str = "empty rbac rule";
    pub const NO_ORPHAN_DELETION: &str = "no orphan deletion";
}

/// Why the guard refused a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    pub rule: &'static str,
    pub detail: String,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.detail)
    }
}

impl Refusal {
    fn new(rule: &'static str, detail: impl Into<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
        }
    }

    pub fn into_validation(self) -> QuotaKeeperError {
        QuotaKeeperError::Validation {
            rule: self.rule,
            detail: self.detail,
        }
    }

    pub fn into_orphan(self, target: ObjectId) -> QuotaKeeperError {
        QuotaKeeperError::OrphanDeletionRefused {
            target,
            detail: self.detail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    reserved_prefix: String,
}

impl AdmissionGuard {
    pub fn new(reserved_prefix: impl Into<String>) -> Self {
        Self {
            reserved_prefix: reserved_prefix.into(),
        }
    }

    /// Validate a spec before it is written to the registry
    pub fn check_put(&self, spec: &TenantSpec) -> Result<(), Refusal> {
        self.check_id(&spec.id)?;

        let quota = &spec.quota;
        check_non_negative(&[
            ("cpuLimit", &quota.cpu_limit),
            ("memLimit", &quota.mem_limit),
            ("cpuRequest", &quota.cpu_request),
            ("memRequest", &quota.mem_request),
        ])?;
        if quota.cpu_request > quota.cpu_limit {
            return Err(Refusal::new(
                rules::CPU_ORDERING,
                format!(
                    "cpuRequest {} is greater than cpuLimit {}",
                    quota.cpu_request, quota.cpu_limit
                ),
            ));
        }
        if quota.mem_request > quota.mem_limit {
            return Err(Refusal::new(
                rules::MEMORY_ORDERING,
                format!(
                    "memRequest {} is greater than memLimit {}",
                    quota.mem_request, quota.mem_limit
                ),
            ));
        }

        if let Some(limits) = &spec.limit_range {
            check_non_negative(&[
                ("defaultCpuRequest", &limits.default_cpu_request),
                ("defaultMemRequest", &limits.default_mem_request),
                ("defaultCpuLimit", &limits.default_cpu_limit),
                ("defaultMemLimit", &limits.default_mem_limit),
            ])?;
            if limits.default_cpu_request > limits.default_cpu_limit
                || limits.default_mem_request > limits.default_mem_limit
            {
                return Err(Refusal::new(
                    rules::LIMIT_DEFAULTS,
                    "default requests must not exceed default limits",
                ));
            }
        }

        if let Some(rule) = spec
            .rbac_rules
            .iter()
            .find(|r| r.verbs.is_empty() || r.resources.is_empty())
        {
            return Err(Refusal::new(
                rules::EMPTY_RULE,
                format!("rule {:?} grants no verbs or resources", rule),
            ));
        }

        let mut seen = HashSet::new();
        for rule in &spec.network_rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(Refusal::new(
                    rules::DUPLICATE_RULE,
                    format!("network rule '{}' is defined more than once", rule.name),
                ));
            }
            if !is_dns_label(&rule.name) {
                return Err(Refusal::new(
                    rules::NAMESPACE_NAME,
                    format!("network rule name '{}' is not a DNS-1123 label", rule.name),
                ));
            }
        }

        Ok(())
    }

    /// Validate a registry delete
    pub fn check_delete(&self, id: &str) -> Result<(), Refusal> {
        self.check_reserved(id)
    }

    /// Refuse deleting a live object that other tenants still reference.
    ///
    /// Cross-tenant references are namespaces named as network peers and
    /// bindings to shared ClusterRoles outside the owner's namespace. A
    /// tenant's own bindings are never shared and can always be revoked.
    /// `owner` is the tenant whose reconciliation wants the deletion.
    pub fn check_object_deletion(
        &self,
        owner: &str,
        target: &ObjectId,
        live: Option<&ManagedObject>,
        tenants: &[TenantSpec],
    ) -> Result<(), Refusal> {
        if target.kind == ObjectKind::Namespace {
            self.check_reserved(&target.name)?;
            let peers: Vec<&str> = tenants
                .iter()
                .filter(|t| t.id != owner)
                .filter(|t| t.network_rules.iter().any(|r| r.namespaces.contains(&target.name)))
                .map(|t| t.id.as_str())
                .collect();
            return refuse_if_held(&format!("Namespace '{}'", target.name), &peers);
        }

        let Some(ManagedObject::RoleBinding(binding)) = live else {
            return Ok(());
        };
        if binding.role_ref.kind != RoleRefKind::ClusterRole || binding.namespace == owner {
            return Ok(());
        }

        let shared = &binding.role_ref.name;
        let holders: Vec<&str> = tenants
            .iter()
            .filter(|t| t.id != owner && t.references_cluster_role(shared))
            .map(|t| t.id.as_str())
            .collect();
        refuse_if_held(&format!("ClusterRole '{}'", shared), &holders)
    }

    fn check_id(&self, id: &str) -> Result<(), Refusal> {
        self.check_reserved(id)?;
        if !is_dns_label(id) {
            return Err(Refusal::new(
                rules::NAMESPACE_NAME,
                format!("'{}' is not a valid DNS-1123 label", id),
            ));
        }
        Ok(())
    }

    fn check_reserved(&self, id: &str) -> Result<(), Refusal> {
        if !self.reserved_prefix.is_empty() && id.starts_with(&self.reserved_prefix) {
            return Err(Refusal::new(
                rules::RESERVED_PREFIX,
                format!("'{}' starts with reserved prefix '{}'", id, self.reserved_prefix),
            ));
        }
        Ok(())
    }
}

fn check_non_negative(fields: &[(&str, &Quantity)]) -> Result<(), Refusal> {
    match fields.iter().find(|(_, value)| value.is_negative()) {
        Some((field, value)) => Err(Refusal::new(
            rules::NEGATIVE_QUANTITY,
            format!("{} {} is negative", field, value),
        )),
        None => Ok(()),
    }
}

fn refuse_if_held(what: &str, holders: &[&str]) -> Result<(), Refusal> {
    if holders.is_empty() {
        return Ok(());
    }
    Err(Refusal::new(
        rules::NO_ORPHAN_DELETION,
        format!("{} is still referenced by tenants {}", what, holders.join(", ")),
    ))
}

/// Lowercase alphanumerics and '-', at most 63 chars, alphanumeric at both ends
fn is_dns_label(name: &str) -> bool {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    !name.is_empty()
        && name.len() <= 63
        && valid_chars
        && !name.starts_with('-')
        && !name.ends_with('-')
}
