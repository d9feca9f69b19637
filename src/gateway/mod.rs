pub mod auth;
pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
use state::AppState;

/// Assemble every route around the shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    // ==========================================================================
    // User Routes - identity from the upstream proxy headers
    // ==========================================================================
    let user_routes = Router::new()
        .route("/wallet/balances", get(handlers::get_balances))
        .route("/wallet/transactions", get(handlers::get_transactions))
        .route("/wallet/transactions/{reference}", get(handlers::get_transaction_status))
        .route("/wallet/deposits", post(handlers::create_deposit))
        .route("/wallet/withdrawals", post(handlers::create_withdrawal))
        .route("/wallet/transfers", post(handlers::create_transfer))
        .route("/swap/preview", post(handlers::preview_swap))
        .route("/swap/execute", post(handlers::execute_swap))
        .layer(from_fn(auth::identity_middleware));

    // ==========================================================================
    // Admin Routes - static token
    // ==========================================================================
    let admin_routes = Router::new()
        .route(
            "/commissions",
            get(handlers::list_commissions).put(handlers::upsert_commission),
        )
        .route("/revenue", get(handlers::list_revenue))
        .layer(from_fn_with_state(state.clone(), auth::admin_middleware));

    // ==========================================================================
    // Public Routes - webhooks authenticate by signature
    // ==========================================================================
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/fx/rate", get(handlers::get_rate))
        .route("/webhooks/{provider}", post(handlers::receive_webhook));

    Router::new()
        .nest("/api/v1", public_routes.merge(user_routes))
        .nest("/api/v1/admin", admin_routes)
        .with_state(state)
        // Stateless, added after with_state
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Bind and serve until the process is stopped.
pub async fn run_server(config: &GatewayConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    tracing::info!(%addr, docs = %format!("http://{}/docs", addr), "Gateway listening");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
