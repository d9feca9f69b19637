//! Provider webhook receiver

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};

use super::super::state::AppState;
use super::super::types::{ApiResult, ok};
use crate::webhook::WebhookOutcome;

/// Receive a provider event
///
/// The body is taken as raw bytes so the signature is checked against
/// exactly what was sent. Every accepted delivery is answered 200, including
/// duplicates and events that need manual reconciliation, so providers stop
/// retrying.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/{provider}",
    params(
        ("provider" = String, Path, description = "Provider key, e.g. mockcard")
    ),
    request_body(content = String, description = "Provider event payload, signed", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookOutcome, content_type = "application/json"),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 404, description = "Unknown provider")
    ),
    tag = "Webhooks"
)]
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookOutcome> {
    let outcome = state.webhooks.handle_webhook(&provider, &headers, &body).await?;
    tracing::debug!(%provider, outcome = outcome.as_str(), "Webhook handled");
    ok(outcome)
}
