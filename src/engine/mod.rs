// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation Engine: drives each tenant's live objects towards its spec.

pub mod backoff;
pub mod diff;
pub mod manager;
pub mod plan;
pub mod status;
mod worker;

pub use backoff::BackoffPolicy;
pub use manager::{engine_channel, EngineEvent, EngineHandle, EngineSettings, ReconciliationEngine};
pub use plan::{Action, Operation, ReconciliationPlan};
pub use status::{StatusBoard, TenantPhase, TenantStatus};
