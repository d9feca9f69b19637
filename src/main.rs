//! Wallet Settlement server
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ Gateway  │───▶│ Services │───▶│  Ledger  │───▶│  Store   │
//! │  (HTTP)  │    │(dep/wdr) │    │(settle 1x)│   │(PG / mem)│
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//!       ▲                                │
//!  webhooks                         notifications
//! ```
//!
//! Usage: `wallet_settlement [--env dev] [--port 8080]`

use std::sync::Arc;

use wallet_settlement::config::AppConfig;
use wallet_settlement::funding::{ExpiryConfig, ExpiryWorker};
use wallet_settlement::gateway::{run_server, state::AppState};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = wallet_settlement::logging::init_logging(&config);

    tracing::info!(
        env = %env,
        version = env!("GIT_HASH"),
        strategy = ?config.ledger.balance_strategy,
        "Starting wallet settlement"
    );

    let state = Arc::new(AppState::from_config(&config).await?);

    let expiry = ExpiryWorker::new(state.ledger.clone(), ExpiryConfig::from(&config.ledger));
    tokio::spawn(async move { expiry.run().await });

    // Settlement notifications; delivery channels subscribe the same way
    let mut events = state.notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    reference = %event.reference,
                    user_id = event.user_id,
                    tx_type = ?event.tx_type,
                    status = ?event.status,
                    amount = %event.amount,
                    currency = %event.currency,
                    "Settlement event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Settlement event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    run_server(&config.gateway, state).await
}
