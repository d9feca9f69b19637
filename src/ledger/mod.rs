//! Wallet ledger.
//!
//! Wallets hold one balance per (user, currency). Transactions move through
//! `PENDING -> COMPLETED | FAILED` exactly once; a wallet balance changes
//! only together with the transition that justifies it.
//!
//! - [`store`]: persistence contract, with [`memory`] and [`postgres`] backends
//! - [`settlement`]: the operations that pair balance changes with status flips
//! - [`locks`]: per-reference serialization

pub mod error;
pub mod locks;
pub mod memory;
pub mod postgres;
pub mod settlement;
pub mod state;
pub mod store;
pub mod types;

pub use error::LedgerError;
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use settlement::{DebitMode, FailOutcome, Ledger, PairRequest, SettlementOutcome};
pub use store::LedgerStore;
pub use types::{
    DepositPurpose, RevenueEntry, RevenueKind, Transaction, TransactionMetadata, TxStatus, TxType, Wallet,
    WalletStatus,
};
