//! Account handlers (balances, history, status polling)

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State},
};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use super::super::auth::AuthenticatedUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, LimitQuery, ok};
use crate::core_types::Currency;
use crate::funding::TransactionStatus;
use crate::ledger::Transaction;

/// One wallet as shown to its owner
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceView {
    pub currency: Currency,
    #[schema(value_type = String, example = "93.00")]
    pub balance: Decimal,
    /// Reserved by pending withdrawals and transfers
    #[schema(value_type = String, example = "0.00")]
    pub held: Decimal,
    #[schema(value_type = String, example = "93.00")]
    pub available: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_address: Option<String>,
}

/// List the caller's wallets
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balances",
    responses(
        (status = 200, description = "Wallet balances", body = [BalanceView], content_type = "application/json"),
        (status = 401, description = "Missing identity headers")
    ),
    security(("user_headers" = [])),
    tag = "Account"
)]
pub async fn get_balances(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Vec<BalanceView>> {
    let wallets = state.ledger.store().list_wallets(user.user_id).await?;
    ok(wallets
        .into_iter()
        .map(|w| BalanceView {
            available: w.available(),
            currency: w.currency,
            balance: w.balance,
            held: w.held,
            deposit_address: w.deposit_address,
        })
        .collect())
}

/// Transaction history, newest first
#[utoipa::path(
    get,
    path = "/api/v1/wallet/transactions",
    params(LimitQuery),
    responses(
        (status = 200, description = "Transactions", body = [Transaction], content_type = "application/json"),
        (status = 401, description = "Missing identity headers")
    ),
    security(("user_headers" = [])),
    tag = "Account"
)]
pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<Transaction>> {
    ok(state.ledger.store().list_transactions(user.user_id, query.limit()).await?)
}

/// Poll one transaction by reference
#[utoipa::path(
    get,
    path = "/api/v1/wallet/transactions/{reference}",
    params(
        ("reference" = String, Path, description = "Internal or provider reference")
    ),
    responses(
        (status = 200, description = "Current status", body = TransactionStatus, content_type = "application/json"),
        (status = 404, description = "No such transaction for this user")
    ),
    security(("user_headers" = [])),
    tag = "Account"
)]
pub async fn get_transaction_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(reference): Path<String>,
) -> ApiResult<TransactionStatus> {
    ok(state.deposits.status(user.user_id, &reference).await?)
}
