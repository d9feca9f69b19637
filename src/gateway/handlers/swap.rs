//! Currency swap handlers

use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use super::super::auth::AuthenticatedUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, SwapExecuteBody, SwapPreviewBody, amount_in, ok};
use crate::swap::{SwapQuote, SwapResult};

/// Price a swap and lock the quote
#[utoipa::path(
    post,
    path = "/api/v1/swap/preview",
    request_body = SwapPreviewBody,
    responses(
        (status = 200, description = "Locked quote", body = SwapQuote, content_type = "application/json"),
        (status = 400, description = "Invalid amount or same currency"),
        (status = 422, description = "No rate for the pair")
    ),
    security(("user_headers" = [])),
    tag = "Swap"
)]
pub async fn preview_swap(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<SwapPreviewBody>,
) -> ApiResult<SwapQuote> {
    let amount = amount_in(&body.amount, &body.from_currency)?;
    let quote = state
        .swaps
        .preview(user.user_id, user.plan, &body.from_currency, &body.to_currency, amount)
        .await?;
    ok(quote)
}

/// Execute a swap, at the locked price when the lock is still valid
#[utoipa::path(
    post,
    path = "/api/v1/swap/execute",
    request_body = SwapExecuteBody,
    responses(
        (status = 200, description = "Swap settled", body = SwapResult, content_type = "application/json"),
        (status = 400, description = "Invalid parameters or quote mismatch"),
        (status = 422, description = "Insufficient funds")
    ),
    security(("user_headers" = [])),
    tag = "Swap"
)]
pub async fn execute_swap(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<SwapExecuteBody>,
) -> ApiResult<SwapResult> {
    let amount = amount_in(&body.amount, &body.from_currency)?;
    let result = state
        .swaps
        .execute(
            user.user_id,
            user.plan,
            &body.from_currency,
            &body.to_currency,
            amount,
            body.lock_id.as_deref(),
            body.idempotency_key.as_deref(),
        )
        .await?;
    ok(result)
}
