// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ordered mutation plans produced by a diff pass.

use crate::types::{ManagedObject, ObjectId};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(op)
    }
}

/// One mutation against a single object
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub op: Operation,
    pub target: ObjectId,
    /// Payload to apply; absent for deletes
    pub desired: Option<ManagedObject>,
    /// Version token observed for the target; absent for creates
    pub token: Option<String>,
}

impl Action {
    pub fn create(desired: ManagedObject) -> Self {
        Self {
            op: Operation::Create,
            target: desired.id(),
            desired: Some(desired),
            token: None,
        }
    }

    pub fn update(desired: ManagedObject, token: &str) -> Self {
        Self {
            op: Operation::Update,
            target: desired.id(),
            desired: Some(desired),
            token: Some(token.to_string()),
        }
    }

    pub fn delete(target: ObjectId, token: &str) -> Self {
        Self {
            op: Operation::Delete,
            target,
            desired: None,
            token: Some(token.to_string()),
        }
    }

    /// Sort key: creates and updates by apply order, then deletes in reverse order
    fn order_key(&self) -> (u8, usize) {
        let rank = self.target.kind.rank();
        match self.op {
            Operation::Create | Operation::Update => (0, rank),
            Operation::Delete => (1, usize::MAX - rank),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.target)
    }
}

/// The actions one pass will run for a tenant, already in execution order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub tenant: String,
    pub actions: Vec<Action>,
}

impl ReconciliationPlan {
    pub fn new(tenant: &str, mut actions: Vec<Action>) -> Self {
        // Stable sort keeps per-kind order deterministic (diff emits by id)
        actions.sort_by_key(Action::order_key);
        Self {
            tenant: tenant.to_string(),
            actions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}
