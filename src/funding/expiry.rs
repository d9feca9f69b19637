//! Deposit Expiry Worker
//!
//! Background worker that fails deposits nobody paid for.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::ledger::{Ledger, LedgerError, TxType};

/// Configuration for the expiry worker
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How often to scan for stale deposits
    pub scan_interval: Duration,
    /// Age after which a PENDING deposit is abandoned
    pub max_age: chrono::Duration,
    /// Maximum deposits to expire per scan
    pub batch_size: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(300),
            max_age: chrono::Duration::hours(24),
            batch_size: 100,
        }
    }
}

impl From<&LedgerConfig> for ExpiryConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.expiry_scan_secs.max(1)),
            max_age: chrono::Duration::hours(config.deposit_expiry_hours),
            ..Self::default()
        }
    }
}

pub struct ExpiryWorker {
    ledger: Arc<Ledger>,
    config: ExpiryConfig,
}

impl ExpiryWorker {
    pub fn new(ledger: Arc<Ledger>, config: ExpiryConfig) -> Self {
        Self { ledger, config }
    }

    /// Run the expiry loop forever.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            max_age_hours = self.config.max_age.num_hours(),
            "Starting deposit expiry worker"
        );

        loop {
            if let Err(e) = self.scan_and_expire().await {
                error!(error = %e, "Deposit expiry scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan. Returns how many deposits were failed.
    pub async fn scan_and_expire(&self) -> Result<usize, LedgerError> {
        let cutoff = self.ledger.clock().now() - self.config.max_age;
        let stale = self
            .ledger
            .store()
            .pending_older_than(TxType::Deposit, cutoff, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale deposits found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale deposits to expire");

        let mut expired = 0;
        for tx in &stale {
            match self.ledger.expire_deposit(tx).await {
                Ok(true) => {
                    expired += 1;
                    debug!(reference = %tx.reference, created_at = %tx.created_at, "Deposit expired");
                }
                // Settled between the scan and the lock
                Ok(false) => {}
                Err(e) => {
                    warn!(reference = %tx.reference, error = %e, "Failed to expire deposit");
                }
            }
        }

        info!(expired, scanned = stale.len(), "Expiry scan complete");
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::BalanceStrategy;
    use crate::core_types::Currency;
    use crate::ledger::{LedgerStore, MemoryLedgerStore, Transaction, TransactionMetadata, TxStatus};
    use crate::notify::BroadcastNotifier;
    use rust_decimal_macros::dec;

    async fn pending_deposit(ledger: &Ledger, reference: &str) -> Transaction {
        let wallet = ledger.store().get_or_create_wallet(8, &Currency::usd()).await.unwrap();
        let tx = Transaction::new_pending(
            wallet.id,
            8,
            TxType::Deposit,
            dec!(10),
            Currency::usd(),
            dec!(0),
            reference.to_string(),
            TransactionMetadata::default(),
            ledger.clock().now(),
        );
        ledger.record_pending(&tx).await.unwrap();
        tx
    }

    #[tokio::test]
    async fn test_only_old_pending_deposits_expire() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryLedgerStore::new(clock.clone()));
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            BalanceStrategy::Atomic,
            Arc::new(BroadcastNotifier::default()),
            clock.clone(),
        ));
        let worker = ExpiryWorker::new(ledger.clone(), ExpiryConfig::default());

        let old = pending_deposit(&ledger, "DEP-OLD").await;
        let paid = pending_deposit(&ledger, "DEP-PAID").await;
        clock.advance(chrono::Duration::hours(25));
        let fresh = pending_deposit(&ledger, "DEP-FRESH").await;
        ledger.confirm_deposit("DEP-PAID", None).await.unwrap();

        assert_eq!(worker.scan_and_expire().await.unwrap(), 1);

        let old = store.get_transaction(old.id).await.unwrap().unwrap();
        assert_eq!(old.status, TxStatus::Failed);
        assert_eq!(old.metadata.failure_reason.as_deref(), Some("expired"));
        let paid = store.get_transaction(paid.id).await.unwrap().unwrap();
        assert_eq!(paid.status, TxStatus::Completed);
        let fresh = store.get_transaction(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, TxStatus::Pending);

        // second scan finds nothing
        assert_eq!(worker.scan_and_expire().await.unwrap(), 0);
    }

    #[test]
    fn test_config_from_ledger_settings() {
        let cfg = ExpiryConfig::from(&LedgerConfig {
            deposit_expiry_hours: 48,
            expiry_scan_secs: 60,
            ..LedgerConfig::default()
        });
        assert_eq!(cfg.max_age, chrono::Duration::hours(48));
        assert_eq!(cfg.scan_interval, Duration::from_secs(60));
    }
}
