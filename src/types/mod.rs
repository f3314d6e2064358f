// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Domain types shared by the registry, observer, engine and aggregator.

pub mod objects;
pub mod observed;
pub mod quantity;
pub mod tenant;
pub mod usage;

pub use objects::{ManagedObject, ObjectId, ObjectKind, ObservedObject};
pub use observed::ObservedState;
pub use quantity::Quantity;
pub use tenant::TenantSpec;
pub use usage::{UsageRecord, UsageSample};
