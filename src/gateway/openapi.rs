//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::commission::{CommissionKind, CommissionSetting, CommissionType};
use crate::funding::{DepositResponse, TransactionStatus, TransferResponse, WithdrawResponse};
use crate::gateway::handlers::{BalanceView, FxRateView, HealthResponse};
use crate::gateway::types::{
    CommissionSettingBody, DepositBody, SwapExecuteBody, SwapPreviewBody, TransferBody, WithdrawBody,
};
use crate::ledger::{DepositPurpose, RevenueEntry, RevenueKind, Transaction, TxStatus, TxType};
use crate::providers::{PaymentInstructions, PaymentMethod};
use crate::swap::{SwapQuote, SwapResult};
use crate::webhook::WebhookOutcome;

/// Header-based identity and admin token schemes
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "user_headers",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-User-Id",
                    "Set by the upstream auth proxy. X-User-Plan (FREE|PRO|BUSINESS) and X-User-Email are optional.",
                ))),
            );
            components.add_security_scheme(
                "admin_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Admin-Token"))),
            );
        }
    }
}

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Settlement API",
        version = "1.0.0",
        description = "Multi-currency wallets: deposits, withdrawals, transfers, swaps and provider webhooks.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health_check,
        crate::gateway::handlers::get_rate,
        crate::gateway::handlers::receive_webhook,
        crate::gateway::handlers::get_balances,
        crate::gateway::handlers::get_transactions,
        crate::gateway::handlers::get_transaction_status,
        crate::gateway::handlers::create_deposit,
        crate::gateway::handlers::create_withdrawal,
        crate::gateway::handlers::create_transfer,
        crate::gateway::handlers::preview_swap,
        crate::gateway::handlers::execute_swap,
        crate::gateway::handlers::list_commissions,
        crate::gateway::handlers::upsert_commission,
        crate::gateway::handlers::list_revenue,
    ),
    components(
        schemas(
            HealthResponse,
            FxRateView,
            BalanceView,
            Transaction,
            TxType,
            TxStatus,
            TransactionStatus,
            DepositBody,
            DepositPurpose,
            DepositResponse,
            PaymentMethod,
            PaymentInstructions,
            WithdrawBody,
            WithdrawResponse,
            TransferBody,
            TransferResponse,
            SwapPreviewBody,
            SwapExecuteBody,
            SwapQuote,
            SwapResult,
            WebhookOutcome,
            CommissionSetting,
            CommissionSettingBody,
            CommissionType,
            CommissionKind,
            RevenueEntry,
            RevenueKind,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Account", description = "Balances and transaction history"),
        (name = "Funding", description = "Deposits and withdrawals"),
        (name = "Transfer", description = "User-to-user transfers"),
        (name = "Swap", description = "Currency conversion"),
        (name = "FX", description = "Exchange rates"),
        (name = "Webhooks", description = "Payment provider callbacks (signature auth)"),
        (name = "Admin", description = "Commission configuration and revenue (token auth)"),
        (name = "System", description = "Health checks and system info")
    )
)]
pub struct ApiDoc;
