// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::constants::resources;
use chrono::Duration;

/// Turns average usage over a window into a cost
pub trait Pricing: Send + Sync {
    fn cost(&self, resource: &str, used: f64, window: Duration) -> f64;
}

/// Flat per-hour prices per unit: cpu cores, memory GiB, pods
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitPricing {
    pub cpu_per_hour: f64,
    pub memory_gib_per_hour: f64,
    pub pod_per_hour: f64,
}

impl Pricing for UnitPricing {
    fn cost(&self, resource: &str, used: f64, window: Duration) -> f64 {
        let unit_price = match resource {
            resources::CPU => self.cpu_per_hour,
            resources::MEMORY => self.memory_gib_per_hour,
            resources::PODS => self.pod_per_hour,
            _ => 0.0,
        };
        let hours = window.num_seconds() as f64 / 3600.0;
        used * unit_price * hours
    }
}
