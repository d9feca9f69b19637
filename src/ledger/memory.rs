//! In-memory ledger store.
//!
//! All state lives behind one mutex, so every trait method is atomic with
//! respect to every other. Used by tests and when no database is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::LedgerError;
use super::store::LedgerStore;
use super::types::{
    RevenueEntry, RevenueKind, SettleOutcome, Transaction, TransactionMetadata, TxStatus, TxType, Wallet,
};
use crate::clock::{Clock, SystemClock};
use crate::core_types::{Currency, TransactionId, UserId, WalletId};

#[derive(Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    wallet_index: HashMap<(UserId, Currency), WalletId>,
    transactions: HashMap<TransactionId, Transaction>,
    /// Insertion order
    tx_order: Vec<TransactionId>,
    revenue: Vec<RevenueEntry>,
    revenue_keys: HashSet<(TransactionId, RevenueKind)>,
    /// Wallets whose credits fail (test hook)
    failing_credits: HashSet<WalletId>,
}

pub struct MemoryLedgerStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryLedgerStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every credit to `wallet_id` fail until cleared.
    pub fn fail_credits_to(&self, wallet_id: WalletId) {
        self.lock().failing_credits.insert(wallet_id);
    }

    pub fn clear_credit_failures(&self) {
        self.lock().failing_credits.clear();
    }

    /// Overwrite a balance directly. Test setup only.
    pub fn seed_balance(&self, wallet_id: WalletId, balance: Decimal) {
        if let Some(w) = self.lock().wallets.get_mut(&wallet_id) {
            w.balance = balance;
        }
    }

    /// Backdate a transaction. Test setup only.
    pub fn set_created_at(&self, id: TransactionId, at: DateTime<Utc>) {
        if let Some(tx) = self.lock().transactions.get_mut(&id) {
            tx.created_at = at;
        }
    }

    fn wallet_mut(state: &mut State, wallet_id: WalletId) -> Result<&mut Wallet, LedgerError> {
        state.wallets.get_mut(&wallet_id).ok_or(LedgerError::WalletNotFound)
    }

    /// The external reference, if a transaction other than `id` already holds it.
    fn external_clash<'a>(state: &State, id: TransactionId, external_reference: Option<&'a str>) -> Option<&'a str> {
        external_reference.filter(|ext| {
            state
                .transactions
                .values()
                .any(|tx| tx.id != id && tx.external_reference.as_deref() == Some(*ext))
        })
    }

    fn apply_credit(state: &mut State, wallet_id: WalletId, amount: Decimal, now: DateTime<Utc>) -> Result<Wallet, LedgerError> {
        if state.failing_credits.contains(&wallet_id) {
            return Err(LedgerError::BalanceUpdateFailed(format!(
                "credit to wallet {} rejected",
                wallet_id
            )));
        }
        let wallet = Self::wallet_mut(state, wallet_id)?;
        wallet.balance += amount;
        wallet.updated_at = now;
        Ok(wallet.clone())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_or_create_wallet(&self, user_id: UserId, currency: &Currency) -> Result<Wallet, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let key = (user_id, currency.clone());
        if let Some(id) = state.wallet_index.get(&key) {
            if let Some(w) = state.wallets.get(id) {
                return Ok(w.clone());
            }
        }
        let wallet = Wallet::new(user_id, currency.clone(), now);
        state.wallet_index.insert(key, wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn get_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.lock().wallets.get(&wallet_id).cloned())
    }

    async fn find_wallet(&self, user_id: UserId, currency: &Currency) -> Result<Option<Wallet>, LedgerError> {
        let state = self.lock();
        Ok(state
            .wallet_index
            .get(&(user_id, currency.clone()))
            .and_then(|id| state.wallets.get(id))
            .cloned())
    }

    async fn list_wallets(&self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError> {
        let mut wallets: Vec<Wallet> = self
            .lock()
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(wallets)
    }

    async fn set_deposit_address(&self, wallet_id: WalletId, address: &str) -> Result<String, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let wallet = Self::wallet_mut(&mut state, wallet_id)?;
        if wallet.deposit_address.is_none() {
            wallet.deposit_address = Some(address.to_string());
            wallet.updated_at = now;
        }
        Ok(wallet.deposit_address.clone().unwrap_or_default())
    }

    async fn credit(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError> {
        let now = self.clock.now();
        Self::apply_credit(&mut self.lock(), wallet_id, amount, now)
    }

    async fn debit(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let wallet = Self::wallet_mut(&mut state, wallet_id)?;
        if wallet.available() < amount {
            return Err(LedgerError::InsufficientFunds {
                available: wallet.available(),
                required: amount,
            });
        }
        wallet.balance -= amount;
        wallet.updated_at = now;
        Ok(wallet.clone())
    }

    async fn hold(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let wallet = Self::wallet_mut(&mut state, wallet_id)?;
        if wallet.available() < amount {
            return Err(LedgerError::InsufficientFunds {
                available: wallet.available(),
                required: amount,
            });
        }
        wallet.held += amount;
        wallet.updated_at = now;
        Ok(wallet.clone())
    }

    async fn release_hold(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let wallet = Self::wallet_mut(&mut state, wallet_id)?;
        if wallet.held < amount {
            return Err(LedgerError::BalanceUpdateFailed(format!(
                "release {} exceeds held {}",
                amount, wallet.held
            )));
        }
        wallet.held -= amount;
        wallet.updated_at = now;
        Ok(wallet.clone())
    }

    async fn settle_hold(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let wallet = Self::wallet_mut(&mut state, wallet_id)?;
        if wallet.held < amount || wallet.balance < amount {
            return Err(LedgerError::BalanceUpdateFailed(format!(
                "settle {} exceeds held {}",
                amount, wallet.held
            )));
        }
        wallet.held -= amount;
        wallet.balance -= amount;
        wallet.updated_at = now;
        Ok(wallet.clone())
    }

    async fn read_balance(&self, wallet_id: WalletId) -> Result<Decimal, LedgerError> {
        let state = self.lock();
        state
            .wallets
            .get(&wallet_id)
            .map(|w| w.balance)
            .ok_or(LedgerError::WalletNotFound)
    }

    async fn write_balance(&self, wallet_id: WalletId, balance: Decimal) -> Result<(), LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.failing_credits.contains(&wallet_id) {
            return Err(LedgerError::BalanceUpdateFailed(format!(
                "write to wallet {} rejected",
                wallet_id
            )));
        }
        let wallet = Self::wallet_mut(&mut state, wallet_id)?;
        wallet.balance = balance;
        wallet.updated_at = now;
        Ok(())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let clash = state.transactions.values().any(|existing| {
            (tx.external_reference.is_some() && existing.external_reference == tx.external_reference)
                || (tx.idempotency_key.is_some()
                    && existing.user_id == tx.user_id
                    && existing.idempotency_key == tx.idempotency_key)
        });
        if clash || state.transactions.contains_key(&tx.id) {
            return Err(LedgerError::Duplicate(tx.reference.clone()));
        }
        state.tx_order.push(tx.id);
        state.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.lock().transactions.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.lock();
        Ok(state
            .tx_order
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .filter(|tx| tx.reference == reference)
            .cloned()
            .collect())
    }

    async fn find_by_external_reference(&self, external_reference: &str) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .lock()
            .transactions
            .values()
            .find(|tx| tx.external_reference.as_deref() == Some(external_reference))
            .cloned())
    }

    async fn find_by_idempotency_key(&self, user_id: UserId, key: &str) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .lock()
            .transactions
            .values()
            .find(|tx| tx.user_id == user_id && tx.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_transactions(&self, user_id: UserId, limit: usize) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.lock();
        Ok(state
            .tx_order
            .iter()
            .rev()
            .filter_map(|id| state.transactions.get(id))
            .filter(|tx| tx.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_status_if(
        &self,
        id: TransactionId,
        expected: TxStatus,
        new: TxStatus,
        metadata: &TransactionMetadata,
        external_reference: Option<&str>,
    ) -> Result<Option<Transaction>, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if let Some(ext) = Self::external_clash(&state, id, external_reference) {
            return Err(LedgerError::Duplicate(ext.to_string()));
        }
        let tx = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        if tx.status != expected {
            return Ok(None);
        }
        if !tx.status.can_transition_to(new) {
            return Err(LedgerError::InvalidTransition {
                from: tx.status,
                to: new,
            });
        }
        tx.status = new;
        tx.metadata = metadata.clone();
        if let Some(ext) = external_reference {
            tx.external_reference = Some(ext.to_string());
        }
        tx.updated_at = now;
        Ok(Some(tx.clone()))
    }

    async fn update_metadata(&self, id: TransactionId, metadata: &TransactionMetadata) -> Result<(), LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let tx = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        tx.metadata = metadata.clone();
        tx.updated_at = now;
        Ok(())
    }

    async fn settle_credit_atomic(
        &self,
        id: TransactionId,
        metadata: &TransactionMetadata,
        external_reference: Option<&str>,
    ) -> Result<SettleOutcome, LedgerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let tx = state
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        match tx.status {
            TxStatus::Completed => return Ok(SettleOutcome::AlreadyCompleted(tx)),
            TxStatus::Failed => return Ok(SettleOutcome::Rejected(tx)),
            TxStatus::Pending => {}
        }
        if let Some(ext) = Self::external_clash(&state, id, external_reference) {
            return Err(LedgerError::Duplicate(ext.to_string()));
        }

        // Credit first; a rejected credit leaves the transaction untouched.
        Self::apply_credit(&mut state, tx.wallet_id, tx.amount, now)?;

        let stored = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        stored.status = TxStatus::Completed;
        stored.metadata = metadata.clone();
        if let Some(ext) = external_reference {
            stored.external_reference = Some(ext.to_string());
        }
        stored.updated_at = now;
        Ok(SettleOutcome::Applied(stored.clone()))
    }

    async fn pending_older_than(
        &self,
        tx_type: TxType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.lock();
        Ok(state
            .tx_order
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .filter(|tx| tx.tx_type == tx_type && tx.status == TxStatus::Pending && tx.created_at < cutoff)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_revenue(&self, entry: &RevenueEntry) -> Result<bool, LedgerError> {
        let mut state = self.lock();
        if !state.revenue_keys.insert((entry.transaction_id, entry.kind)) {
            return Ok(false);
        }
        state.revenue.push(entry.clone());
        Ok(true)
    }

    async fn list_revenue(&self, limit: usize) -> Result<Vec<RevenueEntry>, LedgerError> {
        Ok(self.lock().revenue.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::usd()
    }

    #[tokio::test]
    async fn test_wallet_created_once_per_currency() {
        let store = MemoryLedgerStore::default();
        let a = store.get_or_create_wallet(1, &usd()).await.unwrap();
        let b = store.get_or_create_wallet(1, &usd()).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.balance, Decimal::ZERO);
        store.get_or_create_wallet(1, &Currency::new("BTC").unwrap()).await.unwrap();
        assert_eq!(store.list_wallets(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hold_and_debit_respect_available() {
        let store = MemoryLedgerStore::default();
        let w = store.get_or_create_wallet(1, &usd()).await.unwrap();
        store.credit(w.id, dec!(100)).await.unwrap();
        store.hold(w.id, dec!(60)).await.unwrap();

        let err = store.debit(w.id, dec!(50)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        store.settle_hold(w.id, dec!(60)).await.unwrap();
        let w = store.get_wallet(w.id).await.unwrap().unwrap();
        assert_eq!(w.balance, dec!(40));
        assert_eq!(w.held, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_settle_credit_applies_once() {
        let store = MemoryLedgerStore::default();
        let w = store.get_or_create_wallet(1, &usd()).await.unwrap();
        let tx = Transaction::new_pending(
            w.id,
            1,
            TxType::Deposit,
            dec!(93),
            usd(),
            dec!(7),
            "DEP-1".into(),
            TransactionMetadata::default(),
            Utc::now(),
        );
        store.insert_transaction(&tx).await.unwrap();

        let first = store.settle_credit_atomic(tx.id, &tx.metadata, None).await.unwrap();
        assert!(matches!(first, SettleOutcome::Applied(_)));
        let second = store.settle_credit_atomic(tx.id, &tx.metadata, None).await.unwrap();
        assert!(matches!(second, SettleOutcome::AlreadyCompleted(_)));
        assert_eq!(store.read_balance(w.id).await.unwrap(), dec!(93));
    }

    #[tokio::test]
    async fn test_failed_credit_leaves_transaction_pending() {
        let store = MemoryLedgerStore::default();
        let w = store.get_or_create_wallet(1, &usd()).await.unwrap();
        let tx = Transaction::new_pending(
            w.id,
            1,
            TxType::Deposit,
            dec!(10),
            usd(),
            Decimal::ZERO,
            "DEP-2".into(),
            TransactionMetadata::default(),
            Utc::now(),
        );
        store.insert_transaction(&tx).await.unwrap();
        store.fail_credits_to(w.id);

        assert!(store.settle_credit_atomic(tx.id, &tx.metadata, None).await.is_err());
        let stored = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Pending);
        assert_eq!(store.read_balance(w.id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_external_reference_settles_one_transaction() {
        let store = MemoryLedgerStore::default();
        let w = store.get_or_create_wallet(1, &usd()).await.unwrap();
        let mut txs = Vec::new();
        for reference in ["DEP-X1", "DEP-X2"] {
            let tx = Transaction::new_pending(
                w.id,
                1,
                TxType::Deposit,
                dec!(10),
                usd(),
                Decimal::ZERO,
                reference.into(),
                TransactionMetadata::default(),
                Utc::now(),
            );
            store.insert_transaction(&tx).await.unwrap();
            txs.push(tx);
        }

        store.settle_credit_atomic(txs[0].id, &txs[0].metadata, Some("ch_1")).await.unwrap();
        let err = store
            .settle_credit_atomic(txs[1].id, &txs[1].metadata, Some("ch_1"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Duplicate("ch_1".into()));

        assert_eq!(store.read_balance(w.id).await.unwrap(), dec!(10));
        let second = store.get_transaction(txs[1].id).await.unwrap().unwrap();
        assert_eq!(second.status, TxStatus::Pending);
        let found = store.find_by_external_reference("ch_1").await.unwrap().unwrap();
        assert_eq!(found.id, txs[0].id);

        let err = store
            .update_status_if(txs[1].id, TxStatus::Pending, TxStatus::Completed, &txs[1].metadata, Some("ch_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_duplicate_keys_rejected() {
        let store = MemoryLedgerStore::default();
        let w = store.get_or_create_wallet(1, &usd()).await.unwrap();
        let mut a = Transaction::new_pending(
            w.id,
            1,
            TxType::Deposit,
            dec!(1),
            usd(),
            Decimal::ZERO,
            "DEP-A".into(),
            TransactionMetadata::default(),
            Utc::now(),
        );
        a.idempotency_key = Some("k1".into());
        store.insert_transaction(&a).await.unwrap();

        let mut b = a.clone();
        b.id = TransactionId::new();
        b.reference = "DEP-B".into();
        assert!(matches!(
            store.insert_transaction(&b).await,
            Err(LedgerError::Duplicate(_))
        ));

        // same key for a different user is fine
        b.user_id = 2;
        store.insert_transaction(&b).await.unwrap();
    }

    #[tokio::test]
    async fn test_revenue_recorded_once_per_kind() {
        let store = MemoryLedgerStore::default();
        let entry = RevenueEntry {
            transaction_id: TransactionId::new(),
            kind: RevenueKind::Fee,
            amount: dec!(7),
            currency: usd(),
            tx_type: TxType::Deposit,
            created_at: Utc::now(),
        };
        assert!(store.record_revenue(&entry).await.unwrap());
        assert!(!store.record_revenue(&entry).await.unwrap());
        let spread = RevenueEntry {
            kind: RevenueKind::Spread,
            ..entry
        };
        assert!(store.record_revenue(&spread).await.unwrap());
        assert_eq!(store.list_revenue(10).await.unwrap().len(), 2);
    }
}
