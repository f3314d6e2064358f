// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Desired-state tenant registry.

pub mod store;

pub use store::TenantRegistry;
