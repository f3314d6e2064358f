// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! API group availability checks run before the controller starts

use crate::constants::discovery::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS, REQUIRED_GROUPS};
use crate::error::Result;
use kube::{discovery::Discovery, Client};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait until every API group the controller writes to is served.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_api_groups(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match missing_api_groups(client).await {
            Ok(missing) if missing.is_empty() => {
                info!("Required API groups are available: {}", REQUIRED_GROUPS.join(", "));
                return Ok(());
            }
            Ok(missing) => {
                info!(
                    "API groups {} not yet available, waiting {} seconds...",
                    missing.join(", "),
                    interval
                );
            }
            Err(e) => {
                warn!(
                    "Error running API discovery: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Required groups the discovery endpoint does not list
async fn missing_api_groups(client: &Client) -> Result<Vec<&'static str>> {
    let discovery = Discovery::new(client.clone())
        .filter(REQUIRED_GROUPS)
        .run()
        .await?;

    Ok(REQUIRED_GROUPS
        .iter()
        .copied()
        .filter(|group| !discovery.has_group(group))
        .collect())
}
