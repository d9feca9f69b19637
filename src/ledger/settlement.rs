//! Ledger operations.
//!
//! Every operation on a reference runs under that reference's lock and
//! re-reads the transaction before acting, so a replayed webhook, a racing
//! API call and the expiry worker all observe one consistent status.
//!
//! Two-leg moves (swap, transfer) persist both PENDING legs before any
//! balance changes. If the credit leg fails the debit is reversed; if the
//! reversal also fails both legs stay PENDING with `needs_reconciliation`.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use super::error::LedgerError;
use super::locks::ReferenceLocks;
use super::store::LedgerStore;
use super::types::{
    RevenueEntry, RevenueKind, SettleOutcome, Transaction, TransactionMetadata, TxStatus, TxType,
};
use crate::clock::Clock;
use crate::config::BalanceStrategy;
use crate::core_types::UserId;
use crate::notify::{SettlementEvent, SettlementNotifier};

/// Attempts to put funds back after a failed credit leg.
const COMPENSATION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(Transaction),
    /// Duplicate delivery; nothing changed
    AlreadySettled(Transaction),
}

impl SettlementOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            SettlementOutcome::Settled(tx) | SettlementOutcome::AlreadySettled(tx) => tx,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    Failed(Transaction),
    AlreadyFailed(Transaction),
}

impl FailOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            FailOutcome::Failed(tx) | FailOutcome::AlreadyFailed(tx) => tx,
        }
    }
}

/// How the outgoing leg of a two-leg move leaves the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitMode {
    /// One conditional decrement
    Direct,
    /// Reserve, then consume the reservation
    HoldThenSettle,
}

/// Both legs of a swap or internal transfer, sharing `reference`.
#[derive(Debug, Clone)]
pub struct PairRequest {
    pub out_leg: Transaction,
    pub in_leg: Transaction,
    /// Leaves the source wallet
    pub debit_amount: Decimal,
    /// Arrives in the destination wallet
    pub credit_amount: Decimal,
    pub debit_mode: DebitMode,
    /// Spread income in the destination currency
    pub spread_revenue: Decimal,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    locks: ReferenceLocks,
    strategy: BalanceStrategy,
    notifier: Arc<dyn SettlementNotifier>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        strategy: BalanceStrategy,
        notifier: Arc<dyn SettlementNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            locks: ReferenceLocks::new(),
            strategy,
            notifier,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    /// Serialize requests from one user carrying the same idempotency key,
    /// so a retry waits for the first attempt and then replays its result.
    pub async fn lock_idempotency_key(&self, user_id: UserId, key: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(&format!("idem:{}:{}", user_id, key)).await
    }

    /// Persist a new PENDING transaction.
    pub async fn record_pending(&self, tx: &Transaction) -> Result<(), LedgerError> {
        debug_assert_eq!(tx.status, TxStatus::Pending);
        self.store.insert_transaction(tx).await
    }

    /// Resolve a single-leg transaction by internal or provider reference.
    pub async fn find_single(&self, reference: &str, tx_type: TxType) -> Result<Transaction, LedgerError> {
        if let Some(tx) = self
            .store
            .find_by_reference(reference)
            .await?
            .into_iter()
            .find(|tx| tx.tx_type == tx_type)
        {
            return Ok(tx);
        }
        match self.store.find_by_external_reference(reference).await? {
            Some(tx) if tx.tx_type == tx_type => Ok(tx),
            _ => Err(LedgerError::TransactionNotFound(reference.to_string())),
        }
    }

    // ========================================================================
    // Deposits
    // ========================================================================

    /// Settle a deposit: credit the net amount and flip to COMPLETED, once.
    pub async fn confirm_deposit(
        &self,
        reference: &str,
        external_hash: Option<&str>,
    ) -> Result<SettlementOutcome, LedgerError> {
        let _guard = self.locks.acquire(reference).await;
        let tx = self.find_single(reference, TxType::Deposit).await?;

        match tx.status {
            TxStatus::Completed => {
                debug!(%reference, "Deposit already settled");
                return Ok(SettlementOutcome::AlreadySettled(tx));
            }
            TxStatus::Failed => return Err(LedgerError::AlreadyFailed(reference.to_string())),
            TxStatus::Pending => {}
        }

        self.ensure_external_unclaimed(&tx, external_hash).await?;
        let mut metadata = tx.metadata.clone();
        if let Some(hash) = external_hash {
            metadata.external_hash = Some(hash.to_string());
        }

        let settled = if metadata.is_feature_payment() {
            // Paid for a feature: completes without touching the wallet
            self.transition(&tx, TxStatus::Completed, &metadata, external_hash).await?
        } else {
            match self.strategy {
                BalanceStrategy::Atomic => match self
                    .store
                    .settle_credit_atomic(tx.id, &metadata, external_hash)
                    .await?
                {
                    SettleOutcome::Applied(tx) => tx,
                    SettleOutcome::AlreadyCompleted(tx) => return Ok(SettlementOutcome::AlreadySettled(tx)),
                    SettleOutcome::Rejected(_) => return Err(LedgerError::AlreadyFailed(reference.to_string())),
                },
                BalanceStrategy::ReadModifyWrite => self.settle_credit_rmw(&tx, &metadata, external_hash).await?,
            }
        };

        self.log_revenue(&settled, RevenueKind::Fee, settled.fee).await;
        info!(
            %reference,
            user_id = settled.user_id,
            amount = %settled.amount,
            currency = %settled.currency,
            fee = %settled.fee,
            "Deposit settled"
        );
        self.emit(&settled);
        Ok(SettlementOutcome::Settled(settled))
    }

    /// Read-modify-write credit. Only reached with the reference lock held
    /// and the transaction observed PENDING, so a replay cannot double
    /// credit. Distinct transactions on the same wallet can still race.
    async fn settle_credit_rmw(
        &self,
        tx: &Transaction,
        metadata: &TransactionMetadata,
        external_reference: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        let balance = self.store.read_balance(tx.wallet_id).await?;
        self.store.write_balance(tx.wallet_id, balance + tx.amount).await?;
        match self
            .store
            .update_status_if(tx.id, TxStatus::Pending, TxStatus::Completed, metadata, external_reference)
            .await
        {
            Ok(Some(updated)) => Ok(updated),
            lost => {
                error!(
                    reference = %tx.reference,
                    reconciliation = true,
                    cause = ?lost.err(),
                    "Balance written but status flip lost; wallet credited without COMPLETED row"
                );
                Err(LedgerError::ReconciliationRequired(tx.reference.clone()))
            }
        }
    }

    /// PENDING -> FAILED. COMPLETED deposits cannot fail.
    pub async fn fail_deposit(&self, reference: &str, reason: &str) -> Result<FailOutcome, LedgerError> {
        let _guard = self.locks.acquire(reference).await;
        let tx = self.find_single(reference, TxType::Deposit).await?;
        self.fail_locked(tx, reason).await
    }

    async fn fail_locked(&self, tx: Transaction, reason: &str) -> Result<FailOutcome, LedgerError> {
        match tx.status {
            TxStatus::Failed => Ok(FailOutcome::AlreadyFailed(tx)),
            TxStatus::Completed => Err(LedgerError::InvalidTransition {
                from: TxStatus::Completed,
                to: TxStatus::Failed,
            }),
            TxStatus::Pending => {
                let mut metadata = tx.metadata.clone();
                metadata.failure_reason = Some(reason.to_string());
                let failed = self.transition(&tx, TxStatus::Failed, &metadata, None).await?;
                info!(reference = %failed.reference, tx_type = %failed.tx_type, %reason, "Transaction failed");
                self.emit(&failed);
                Ok(FailOutcome::Failed(failed))
            }
        }
    }

    // ========================================================================
    // Withdrawals
    // ========================================================================

    /// Reserve the gross amount and persist the PENDING withdrawal.
    pub async fn open_withdrawal(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let _guard = self.locks.acquire(&tx.reference).await;
        let gross = tx.gross_amount();
        self.store.hold(tx.wallet_id, gross).await?;
        if let Err(e) = self.store.insert_transaction(tx).await {
            self.store.release_hold(tx.wallet_id, gross).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Provider paid out: consume the hold.
    pub async fn complete_withdrawal(
        &self,
        reference: &str,
        external_hash: Option<&str>,
    ) -> Result<SettlementOutcome, LedgerError> {
        let _guard = self.locks.acquire(reference).await;
        let tx = self.find_single(reference, TxType::Withdrawal).await?;
        match tx.status {
            TxStatus::Completed => return Ok(SettlementOutcome::AlreadySettled(tx)),
            TxStatus::Failed => return Err(LedgerError::AlreadyFailed(reference.to_string())),
            TxStatus::Pending => {}
        }

        self.ensure_external_unclaimed(&tx, external_hash).await?;
        self.store.settle_hold(tx.wallet_id, tx.gross_amount()).await?;
        let mut metadata = tx.metadata.clone();
        if let Some(hash) = external_hash {
            metadata.external_hash = Some(hash.to_string());
        }
        let done = self.transition(&tx, TxStatus::Completed, &metadata, external_hash).await?;

        self.log_revenue(&done, RevenueKind::Fee, done.fee).await;
        info!(%reference, user_id = done.user_id, amount = %done.amount, "Withdrawal completed");
        self.emit(&done);
        Ok(SettlementOutcome::Settled(done))
    }

    /// Payout rejected: give the reserved funds back.
    pub async fn reverse_withdrawal(&self, reference: &str, reason: &str) -> Result<FailOutcome, LedgerError> {
        let _guard = self.locks.acquire(reference).await;
        let tx = self.find_single(reference, TxType::Withdrawal).await?;
        if tx.status == TxStatus::Pending {
            self.store.release_hold(tx.wallet_id, tx.gross_amount()).await?;
        }
        self.fail_locked(tx, reason).await
    }

    // ========================================================================
    // Two-leg moves
    // ========================================================================

    /// Debit `out_leg`'s wallet and credit `in_leg`'s wallet as one logical
    /// operation. Replaying a reference returns the recorded legs.
    pub async fn execute_pair(&self, req: PairRequest) -> Result<(Transaction, Transaction), LedgerError> {
        let reference = req.out_leg.reference.clone();
        let _guard = self.locks.acquire(&reference).await;

        let existing = self.store.find_by_reference(&reference).await?;
        if !existing.is_empty() {
            let out = existing.iter().find(|t| t.tx_type == req.out_leg.tx_type).cloned();
            let inn = existing.iter().find(|t| t.tx_type == req.in_leg.tx_type).cloned();
            if let (Some(out), Some(inn)) = (out, inn) {
                debug!(%reference, "Replay of recorded pair");
                return Ok((out, inn));
            }
            return Err(LedgerError::Duplicate(reference));
        }

        let out_wallet = req.out_leg.wallet_id;
        let in_wallet = req.in_leg.wallet_id;

        // Reserve first so an underfunded transfer leaves no rows behind.
        if req.debit_mode == DebitMode::HoldThenSettle {
            self.store.hold(out_wallet, req.debit_amount).await?;
        }

        let persisted = async {
            self.store.insert_transaction(&req.out_leg).await?;
            self.store.insert_transaction(&req.in_leg).await
        }
        .await;
        if let Err(e) = persisted {
            if req.debit_mode == DebitMode::HoldThenSettle {
                self.store.release_hold(out_wallet, req.debit_amount).await?;
            }
            return Err(e);
        }

        let debited = match req.debit_mode {
            DebitMode::Direct => self.store.debit(out_wallet, req.debit_amount).await,
            DebitMode::HoldThenSettle => self.store.settle_hold(out_wallet, req.debit_amount).await,
        };
        if let Err(e) = debited {
            if req.debit_mode == DebitMode::HoldThenSettle {
                if let Err(re) = self.store.release_hold(out_wallet, req.debit_amount).await {
                    warn!(%reference, error = %re, "Could not release hold after failed debit");
                }
            }
            self.fail_legs(&req, &e.to_string()).await;
            return Err(e);
        }

        if let Err(credit_err) = self.store.credit(in_wallet, req.credit_amount).await {
            warn!(%reference, error = %credit_err, "Credit leg failed, reversing debit");
            return Err(self.compensate(&req, credit_err).await);
        }

        let out = self
            .transition(&req.out_leg, TxStatus::Completed, &req.out_leg.metadata, None)
            .await?;
        let inn = self
            .transition(&req.in_leg, TxStatus::Completed, &req.in_leg.metadata, None)
            .await?;

        self.log_revenue(&out, RevenueKind::Fee, out.fee).await;
        self.log_revenue(&inn, RevenueKind::Spread, req.spread_revenue).await;
        info!(
            %reference,
            out_type = %out.tx_type,
            debit = %req.debit_amount,
            debit_currency = %out.currency,
            credit = %req.credit_amount,
            credit_currency = %inn.currency,
            "Pair settled"
        );
        self.emit(&out);
        self.emit(&inn);
        Ok((out, inn))
    }

    /// Put the debited funds back. On success both legs fail; otherwise both
    /// stay PENDING and are flagged for a human.
    async fn compensate(&self, req: &PairRequest, cause: LedgerError) -> LedgerError {
        let reference = &req.out_leg.reference;
        let mut last_err = None;
        for attempt in 1..=COMPENSATION_ATTEMPTS {
            match self.store.credit(req.out_leg.wallet_id, req.debit_amount).await {
                Ok(_) => {
                    info!(%reference, attempt, "Debit reversed");
                    self.fail_legs(req, &format!("credit leg failed: {}", cause)).await;
                    return LedgerError::BalanceUpdateFailed(format!(
                        "{}: credit leg failed, source re-credited",
                        reference
                    ));
                }
                Err(e) => {
                    warn!(%reference, attempt, error = %e, "Debit reversal failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                }
            }
        }

        let note = format!(
            "credit leg failed ({}); reversal failed ({})",
            cause,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        );
        error!(
            %reference,
            reconciliation = true,
            debit_wallet = %req.out_leg.wallet_id,
            amount = %req.debit_amount,
            "Funds debited but neither credited nor returned"
        );
        for leg in [&req.out_leg, &req.in_leg] {
            let mut metadata = leg.metadata.clone();
            metadata.needs_reconciliation = true;
            metadata.reconciliation_note = Some(note.clone());
            if let Err(e) = self.store.update_metadata(leg.id, &metadata).await {
                error!(%reference, error = %e, "Could not flag leg for reconciliation");
            }
        }
        LedgerError::ReconciliationRequired(reference.clone())
    }

    async fn fail_legs(&self, req: &PairRequest, reason: &str) {
        for leg in [&req.out_leg, &req.in_leg] {
            let mut metadata = leg.metadata.clone();
            metadata.failure_reason = Some(reason.to_string());
            match self
                .store
                .update_status_if(leg.id, TxStatus::Pending, TxStatus::Failed, &metadata, None)
                .await
            {
                Ok(Some(failed)) => self.emit(&failed),
                Ok(None) => {}
                Err(e) => error!(reference = %leg.reference, error = %e, "Could not fail leg"),
            }
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Mark every leg of `reference` for manual reconciliation.
    pub async fn flag_reconciliation(&self, reference: &str, note: &str) -> Result<usize, LedgerError> {
        let _guard = self.locks.acquire(reference).await;
        let mut legs = self.store.find_by_reference(reference).await?;
        if legs.is_empty() {
            if let Some(tx) = self.store.find_by_external_reference(reference).await? {
                legs.push(tx);
            }
        }
        for leg in &legs {
            let mut metadata = leg.metadata.clone();
            metadata.needs_reconciliation = true;
            metadata.reconciliation_note = Some(note.to_string());
            self.store.update_metadata(leg.id, &metadata).await?;
        }
        Ok(legs.len())
    }

    /// Fail one stale PENDING deposit. Returns false if it settled meanwhile.
    pub async fn expire_deposit(&self, tx: &Transaction) -> Result<bool, LedgerError> {
        let _guard = self.locks.acquire(&tx.reference).await;
        let current = self
            .store
            .get_transaction(tx.id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(tx.reference.clone()))?;
        if current.status != TxStatus::Pending {
            return Ok(false);
        }
        self.fail_locked(current, "expired").await?;
        Ok(true)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// A provider settlement id already recorded on another transaction
    /// proves this delivery was counted before.
    async fn ensure_external_unclaimed(
        &self,
        tx: &Transaction,
        external_reference: Option<&str>,
    ) -> Result<(), LedgerError> {
        let Some(ext) = external_reference else {
            return Ok(());
        };
        match self.store.find_by_external_reference(ext).await? {
            Some(other) if other.id != tx.id => {
                warn!(
                    security = true,
                    reference = %tx.reference,
                    external_reference = %ext,
                    settled_reference = %other.reference,
                    "Provider id already settled another transaction"
                );
                Err(LedgerError::Duplicate(ext.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn transition(
        &self,
        tx: &Transaction,
        next: TxStatus,
        metadata: &TransactionMetadata,
        external_reference: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        self.store
            .update_status_if(tx.id, TxStatus::Pending, next, metadata, external_reference)
            .await?
            .ok_or(LedgerError::InvalidTransition {
                from: tx.status,
                to: next,
            })
    }

    async fn log_revenue(&self, tx: &Transaction, kind: RevenueKind, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let entry = RevenueEntry {
            transaction_id: tx.id,
            kind,
            amount,
            currency: tx.currency.clone(),
            tx_type: tx.tx_type,
            created_at: self.clock.now(),
        };
        match self.store.record_revenue(&entry).await {
            Ok(true) => debug!(reference = %tx.reference, kind = kind.as_str(), %amount, "Revenue recorded"),
            Ok(false) => debug!(reference = %tx.reference, kind = kind.as_str(), "Revenue already recorded"),
            // Balance already moved; revenue can be rebuilt from transactions
            Err(e) => error!(reference = %tx.reference, error = %e, "Failed to record revenue"),
        }
    }

    fn emit(&self, tx: &Transaction) {
        self.notifier.notify(SettlementEvent::from_transaction(tx));
    }
}
