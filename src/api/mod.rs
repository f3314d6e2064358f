// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Operator HTTP API: tenant registry, reconciliation status and the cost record stream.

pub mod handlers;

use crate::engine::{EngineHandle, StatusBoard};
use crate::error::QuotaKeeperError;
use crate::registry::TenantRegistry;
use crate::usage::UsageStore;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    pub status: StatusBoard,
    pub usage: Arc<UsageStore>,
    pub engine: EngineHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/api/v1/tenants",
            get(handlers::list_tenants).post(handlers::create_tenant),
        )
        .route(
            "/api/v1/tenants/{id}",
            get(handlers::get_tenant)
                .put(handlers::replace_tenant)
                .delete(handlers::delete_tenant),
        )
        .route("/api/v1/tenants/{id}/status", get(handlers::tenant_status))
        .route("/api/v1/tenants/{id}/retry", post(handlers::retry_tenant))
        .route("/api/v1/status/degraded", get(handlers::degraded_tenants))
        .route("/api/v1/usage", get(handlers::usage_records))
        .with_state(state)
}

/// Serve the API until the shutdown signal fires
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Starting API server on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

impl IntoResponse for QuotaKeeperError {
    fn into_response(self) -> Response {
        let status = match &self {
            QuotaKeeperError::Validation { .. } => StatusCode::BAD_REQUEST,
            QuotaKeeperError::NotFound(_) => StatusCode::NOT_FOUND,
            QuotaKeeperError::Conflict(_) | QuotaKeeperError::OrphanDeletionRefused { .. } => {
                StatusCode::CONFLICT
            }
            QuotaKeeperError::DegradedTenant { .. } => StatusCode::LOCKED,
            QuotaKeeperError::TransientCluster(_) | QuotaKeeperError::KubeError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            QuotaKeeperError::Storage(_) | QuotaKeeperError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let rule = match &self {
            QuotaKeeperError::Validation { rule, .. } => Some(*rule),
            _ => None,
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "rule": rule,
        });
        (status, Json(body)).into_response()
    }
}
