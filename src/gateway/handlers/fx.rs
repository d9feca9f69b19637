//! FX rate lookup

use std::sync::Arc;

use axum::extract::{Query, State};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, FxRateQuery, ok};
use crate::core_types::Currency;
use crate::fx::RateOrigin;

#[derive(Debug, Serialize, ToSchema)]
pub struct FxRateView {
    pub from: Currency,
    pub to: Currency,
    /// Units of `to` per unit of `from`
    #[schema(value_type = String, example = "1.08")]
    pub rate: Decimal,
    pub buffered: bool,
    pub origin: RateOrigin,
}

/// Current conversion rate for a pair
#[utoipa::path(
    get,
    path = "/api/v1/fx/rate",
    params(FxRateQuery),
    responses(
        (status = 200, description = "Rate", body = FxRateView, content_type = "application/json"),
        (status = 400, description = "Invalid currency code"),
        (status = 422, description = "No rate available for the pair")
    ),
    tag = "FX"
)]
pub async fn get_rate(State(state): State<Arc<AppState>>, Query(query): Query<FxRateQuery>) -> ApiResult<FxRateView> {
    let from = Currency::new(&query.from).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let to = Currency::new(&query.to).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let quote = state.fx.quote(&from, &to).await?;
    let rate = if query.buffered {
        state.fx.get_rate(&from, &to, true).await?
    } else {
        quote.rate
    };

    ok(FxRateView {
        from,
        to,
        rate,
        buffered: query.buffered && quote.origin != RateOrigin::Identity,
        origin: quote.origin,
    })
}
