// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Usage Aggregator: rolls quota telemetry up into per-window cost records.

pub mod aggregator;
pub mod pricing;
pub mod store;

pub use aggregator::{usage_channel, AggregatorHandle, UsageAggregator};
pub use pricing::{Pricing, UnitPricing};
pub use store::{CostRecordSink, UsageStore};
