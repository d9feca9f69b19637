//! Admin handlers (commission settings, revenue)

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use tracing::info;

use super::super::state::AppState;
use super::super::types::{ApiResult, CommissionSettingBody, LimitQuery, ok};
use crate::commission::CommissionSetting;
use crate::ledger::RevenueEntry;

/// List every commission setting
#[utoipa::path(
    get,
    path = "/api/v1/admin/commissions",
    responses(
        (status = 200, description = "Settings", body = [CommissionSetting], content_type = "application/json"),
        (status = 403, description = "Admin token missing or wrong")
    ),
    security(("admin_token" = [])),
    tag = "Admin"
)]
pub async fn list_commissions(State(state): State<Arc<AppState>>) -> ApiResult<Vec<CommissionSetting>> {
    ok(state.commission.store().list().await?)
}

/// Create or replace the setting for (type, currency)
///
/// Takes effect on the next calculation.
#[utoipa::path(
    put,
    path = "/api/v1/admin/commissions",
    request_body = CommissionSettingBody,
    responses(
        (status = 200, description = "Stored setting", body = CommissionSetting, content_type = "application/json"),
        (status = 400, description = "Invalid setting"),
        (status = 403, description = "Admin token missing or wrong")
    ),
    security(("admin_token" = [])),
    tag = "Admin"
)]
pub async fn upsert_commission(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommissionSettingBody>,
) -> ApiResult<CommissionSetting> {
    let setting = body.into_setting()?;
    let stored = state.commission.store().upsert(setting).await?;
    state.commission.invalidate();
    info!(
        tx_type = %stored.tx_type,
        currency = stored.currency.as_ref().map(|c| c.as_str()).unwrap_or("*"),
        kind = stored.kind.as_str(),
        value = %stored.value,
        active = stored.active,
        "Commission setting updated"
    );
    ok(stored)
}

/// Recorded platform revenue, newest first
#[utoipa::path(
    get,
    path = "/api/v1/admin/revenue",
    params(LimitQuery),
    responses(
        (status = 200, description = "Revenue rows", body = [RevenueEntry], content_type = "application/json"),
        (status = 403, description = "Admin token missing or wrong")
    ),
    security(("admin_token" = [])),
    tag = "Admin"
)]
pub async fn list_revenue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<RevenueEntry>> {
    ok(state.ledger.store().list_revenue(query.limit()).await?)
}
