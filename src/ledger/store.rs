//! Ledger persistence contract.
//!
//! Every balance mutation here is a single atomic operation on the backing
//! store. Conditional debits and holds check `available` inside that same
//! operation, never in a separate read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::LedgerError;
use super::types::{RevenueEntry, SettleOutcome, Transaction, TransactionMetadata, TxStatus, TxType, Wallet};
use crate::core_types::{Currency, TransactionId, UserId, WalletId};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // === Wallets ===

    /// Return the wallet for (user, currency), creating it with zero balance.
    async fn get_or_create_wallet(&self, user_id: UserId, currency: &Currency) -> Result<Wallet, LedgerError>;

    async fn get_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>, LedgerError>;

    async fn find_wallet(&self, user_id: UserId, currency: &Currency) -> Result<Option<Wallet>, LedgerError>;

    async fn list_wallets(&self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError>;

    /// Set the crypto deposit address if none is recorded yet; returns the stored one.
    async fn set_deposit_address(&self, wallet_id: WalletId, address: &str) -> Result<String, LedgerError>;

    // === Balance primitives ===

    async fn credit(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError>;

    /// Subtract from balance only if `available >= amount`.
    async fn debit(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError>;

    /// Reserve funds only if `available >= amount`.
    async fn hold(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError>;

    async fn release_hold(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError>;

    /// Consume a hold: both `held` and `balance` drop by `amount`.
    async fn settle_hold(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError>;

    /// Plain read, for the read-modify-write strategy.
    async fn read_balance(&self, wallet_id: WalletId) -> Result<Decimal, LedgerError>;

    /// Plain write, for the read-modify-write strategy.
    async fn write_balance(&self, wallet_id: WalletId, balance: Decimal) -> Result<(), LedgerError>;

    // === Transactions ===

    /// Fails with `Duplicate` on a repeated external reference or idempotency key.
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError>;

    /// All legs sharing an internal reference, oldest first.
    async fn find_by_reference(&self, reference: &str) -> Result<Vec<Transaction>, LedgerError>;

    async fn find_by_external_reference(&self, external_reference: &str) -> Result<Option<Transaction>, LedgerError>;

    async fn find_by_idempotency_key(&self, user_id: UserId, key: &str) -> Result<Option<Transaction>, LedgerError>;

    async fn list_transactions(&self, user_id: UserId, limit: usize) -> Result<Vec<Transaction>, LedgerError>;

    /// Compare-and-set on status. Returns the updated row, or `None` when the
    /// current status was not `expected`. A given `external_reference` is
    /// recorded in the same write and fails with `Duplicate` if another
    /// transaction already holds it.
    async fn update_status_if(
        &self,
        id: TransactionId,
        expected: TxStatus,
        new: TxStatus,
        metadata: &TransactionMetadata,
        external_reference: Option<&str>,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn update_metadata(&self, id: TransactionId, metadata: &TransactionMetadata) -> Result<(), LedgerError>;

    /// Flip PENDING -> COMPLETED, record `external_reference` and add
    /// `amount` to the wallet in one indivisible step. Nothing is credited
    /// when the external reference belongs to another transaction.
    async fn settle_credit_atomic(
        &self,
        id: TransactionId,
        metadata: &TransactionMetadata,
        external_reference: Option<&str>,
    ) -> Result<SettleOutcome, LedgerError>;

    /// PENDING transactions of `tx_type` created before `cutoff`.
    async fn pending_older_than(
        &self,
        tx_type: TxType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError>;

    // === Revenue ===

    /// Returns false when the (transaction, kind) row already exists.
    async fn record_revenue(&self, entry: &RevenueEntry) -> Result<bool, LedgerError>;

    async fn list_revenue(&self, limit: usize) -> Result<Vec<RevenueEntry>, LedgerError>;
}
