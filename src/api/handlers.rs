// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::api::AppState;
use crate::engine::{EngineEvent, TenantStatus};
use crate::error::{QuotaKeeperError, Result};
use crate::types::{TenantSpec, UsageRecord};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ============================================================
// Tenant registry
// ============================================================

pub async fn list_tenants(State(state): State<AppState>) -> Json<Vec<TenantSpec>> {
    Json(state.registry.list().await)
}

pub async fn create_tenant(
    State(state): State<AppState>,
    Json(spec): Json<TenantSpec>,
) -> Result<impl IntoResponse> {
    state.registry.put(spec.clone()).await?;
    Ok((StatusCode::CREATED, Json(spec)))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TenantSpec>> {
    Ok(Json(state.registry.get(&id).await?))
}

pub async fn replace_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(spec): Json<TenantSpec>,
) -> Result<Json<TenantSpec>> {
    if spec.id != id {
        return Err(QuotaKeeperError::validation(
            "id matches path",
            format!("body id '{}' does not match path id '{}'", spec.id, id),
        ));
    }
    state.registry.put(spec.clone()).await?;
    Ok(Json(spec))
}

pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Reconciliation status
// ============================================================

pub async fn tenant_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TenantStatus>> {
    state.registry.get(&id).await?;
    Ok(Json(state.status.get(&id).await.unwrap_or_default()))
}

/// Re-run a tenant now, clearing Degraded
pub async fn retry_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.registry.get(&id).await?;
    info!("Operator retry requested for tenant {}", id);
    state.engine.send(EngineEvent::Retry { tenant: id }).await;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize)]
pub struct DegradedEntry {
    pub tenant: String,
    #[serde(flatten)]
    pub status: TenantStatus,
}

pub async fn degraded_tenants(State(state): State<AppState>) -> Json<Vec<DegradedEntry>> {
    let entries = state
        .status
        .degraded()
        .await
        .into_iter()
        .map(|(tenant, status)| DegradedEntry { tenant, status })
        .collect();
    Json(entries)
}

// ============================================================
// Cost records
// ============================================================

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

pub async fn usage_records(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Json<Vec<UsageRecord>> {
    let since = query.since.unwrap_or(DateTime::UNIX_EPOCH);
    Json(state.usage.records_since(since).await)
}
