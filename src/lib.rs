//! Wallet Settlement - multi-currency wallet and payment settlement core
//!
//! Users hold fiat and crypto balances, fund them through external payment
//! providers, withdraw, transfer to each other and swap between currencies.
//! Every balance change settles exactly once.
//!
//! # Modules
//!
//! - [`core_types`] - Currency, plan tier and id types
//! - [`money`] - Per-currency rounding and amount validation
//! - [`fx`] - Exchange rates with caching, bridging and fallbacks
//! - [`commission`] - Fee and spread calculation
//! - [`providers`] - Payment gateway adapters
//! - [`ledger`] - Wallets, transactions and exactly-once settlement
//! - [`webhook`] - Signature-verified provider events
//! - [`funding`] - Deposits, withdrawals, transfers and deposit expiry
//! - [`swap`] - Quoted currency conversion
//! - [`gateway`] - HTTP API

// Core types - must be first!
pub mod core_types;

pub mod clock;
pub mod commission;
pub mod config;
pub mod db;
pub mod funding;
pub mod fx;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod notify;
pub mod providers;
pub mod swap;
pub mod webhook;

// Convenient re-exports at crate root
pub use core_types::{Currency, PlanTier, TransactionId, UserId, WalletId};
pub use ledger::{Ledger, LedgerError, Transaction, TxStatus, TxType, Wallet};
