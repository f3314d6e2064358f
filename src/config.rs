// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{backoff, DEFAULT_RESERVED_PREFIX};
use crate::engine::{BackoffPolicy, EngineSettings};
use crate::usage::UnitPricing;
use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Tenant ids starting with this prefix are refused
    pub reserved_prefix: String,
    pub prune_extras: bool,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub resync_interval: Duration,
    pub aggregation_period: Duration,
    pub pricing: UnitPricing,
    /// JSON snapshot of the tenant registry; in-memory only if unset
    pub registry_path: Option<PathBuf>,
    /// Multi-document YAML of tenant specs loaded at startup
    pub registry_seed: Option<PathBuf>,
    pub usage_path: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let reserved_prefix = or_default("RESERVED_PREFIX", DEFAULT_RESERVED_PREFIX);
        let prune_extras = parse(&lookup, "PRUNE_EXTRAS", false)?;
        let max_retries = parse(&lookup, "MAX_RETRIES", backoff::MAX_RETRIES)?;
        let backoff_base_ms = parse(&lookup, "BACKOFF_BASE_MS", backoff::BASE_MS)?;
        let backoff_cap_secs = parse(&lookup, "BACKOFF_CAP_SECS", backoff::CAP_SECS)?;
        let resync_secs: u64 = parse(&lookup, "RESYNC_INTERVAL_SECS", 300)?;
        let aggregation_secs: u64 = parse(&lookup, "AGGREGATION_PERIOD_SECS", 86_400)?;
        if aggregation_secs == 0 {
            anyhow::bail!("AGGREGATION_PERIOD_SECS must be greater than zero");
        }

        let pricing = UnitPricing {
            cpu_per_hour: parse(&lookup, "UNIT_PRICE_CPU", 0.0)?,
            memory_gib_per_hour: parse(&lookup, "UNIT_PRICE_MEMORY_GIB", 0.0)?,
            pod_per_hour: parse(&lookup, "UNIT_PRICE_POD", 0.0)?,
        };

        let listen_addr = or_default("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .context("LISTEN_ADDR is not a valid socket address")?;
        let json_logs = lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Config {
            reserved_prefix,
            prune_extras,
            max_retries,
            backoff_base: Duration::from_millis(backoff_base_ms),
            backoff_cap: Duration::from_secs(backoff_cap_secs),
            resync_interval: Duration::from_secs(resync_secs.max(1)),
            aggregation_period: Duration::from_secs(aggregation_secs),
            pricing,
            registry_path: path("REGISTRY_PATH"),
            registry_seed: path("REGISTRY_SEED"),
            usage_path: path("USAGE_PATH"),
            listen_addr,
            json_logs,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            prune_extras: self.prune_extras,
            backoff: BackoffPolicy {
                base: self.backoff_base,
                cap: self.backoff_cap,
                max_retries: self.max_retries,
            },
            resync_interval: self.resync_interval,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
