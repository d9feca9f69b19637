//! Internal transfer handler

use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use super::super::auth::AuthenticatedUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, TransferBody, amount_in, ok};
use crate::funding::{TransferRequest, TransferResponse};

/// Send funds to another user in the same currency
#[utoipa::path(
    post,
    path = "/api/v1/wallet/transfers",
    request_body = TransferBody,
    responses(
        (status = 200, description = "Transfer completed", body = TransferResponse, content_type = "application/json"),
        (status = 400, description = "Invalid parameters or self transfer"),
        (status = 422, description = "Insufficient funds")
    ),
    security(("user_headers" = [])),
    tag = "Transfer"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<TransferBody>,
) -> ApiResult<TransferResponse> {
    let amount = amount_in(&body.amount, &body.currency)?;
    tracing::debug!(from = user.user_id, to = body.to_user_id, currency = %body.currency, "Transfer requested");
    let resp = state
        .transfers
        .execute(TransferRequest {
            from_user: user.user_id,
            to_user: body.to_user_id,
            plan: user.plan,
            currency: body.currency,
            amount,
            idempotency_key: body.idempotency_key,
        })
        .await?;
    ok(resp)
}
