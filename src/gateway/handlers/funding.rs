//! Deposit and withdrawal handlers

use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use super::super::auth::AuthenticatedUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, DepositBody, WithdrawBody, amount_in, ok};
use crate::funding::{DepositRequest, DepositResponse, WithdrawRequest, WithdrawResponse};

/// Start a deposit
///
/// Creates a PENDING deposit and returns what the user must do to pay:
/// a checkout URL, bank details, or a crypto address. The wallet is
/// credited when the provider's webhook confirms payment.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/deposits",
    request_body = DepositBody,
    responses(
        (status = 200, description = "Deposit initiated", body = DepositResponse, content_type = "application/json"),
        (status = 400, description = "Invalid amount or currency"),
        (status = 502, description = "Provider rejected the request"),
        (status = 503, description = "No provider for this method")
    ),
    security(("user_headers" = [])),
    tag = "Funding"
)]
pub async fn create_deposit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<DepositBody>,
) -> ApiResult<DepositResponse> {
    let amount = amount_in(&body.amount, &body.currency)?;
    let resp = state
        .deposits
        .initiate(DepositRequest {
            user_id: user.user_id,
            user_email: user.email,
            plan: user.plan,
            method: body.method,
            currency: body.currency,
            amount,
            idempotency_key: body.idempotency_key,
            purpose: body.purpose,
        })
        .await?;
    ok(resp)
}

/// Withdraw to a bank account or chain address
///
/// The gross amount is held immediately; the payout settles by webhook.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/withdrawals",
    request_body = WithdrawBody,
    responses(
        (status = 200, description = "Withdrawal submitted", body = WithdrawResponse, content_type = "application/json"),
        (status = 400, description = "Invalid amount, currency or destination"),
        (status = 422, description = "Insufficient funds"),
        (status = 502, description = "Provider rejected the payout")
    ),
    security(("user_headers" = [])),
    tag = "Funding"
)]
pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<WithdrawBody>,
) -> ApiResult<WithdrawResponse> {
    let amount = amount_in(&body.amount, &body.currency)?;
    let resp = state
        .withdrawals
        .initiate(WithdrawRequest {
            user_id: user.user_id,
            plan: user.plan,
            method: body.method,
            currency: body.currency,
            amount,
            destination: body.destination,
            idempotency_key: body.idempotency_key,
        })
        .await?;
    ok(resp)
}
