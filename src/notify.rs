//! Settlement notifications.
//!
//! Every terminal transition produces one [`SettlementEvent`]. Delivery to
//! users (push, email, chat) is owned by whoever subscribes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core_types::{Currency, TransactionId, UserId};
use crate::ledger::types::{Transaction, TxStatus, TxType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementEvent {
    pub transaction_id: TransactionId,
    pub reference: String,
    pub user_id: UserId,
    pub tx_type: TxType,
    pub status: TxStatus,
    pub amount: Decimal,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

impl SettlementEvent {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            user_id: tx.user_id,
            tx_type: tx.tx_type,
            status: tx.status,
            amount: tx.amount,
            currency: tx.currency.clone(),
            occurred_at: tx.updated_at,
        }
    }
}

pub trait SettlementNotifier: Send + Sync {
    /// Must not block; delivery failures are the subscriber's problem.
    fn notify(&self, event: SettlementEvent);
}

/// Fan-out over a tokio broadcast channel.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SettlementEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SettlementNotifier for BroadcastNotifier {
    fn notify(&self, event: SettlementEvent) {
        let reference = event.reference.clone();
        // Err only means nobody is listening
        if self.sender.send(event).is_err() {
            debug!(%reference, "Settlement event dropped, no subscribers");
        }
    }
}
