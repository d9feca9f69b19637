use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

pub use super::state::TxStatus;
use crate::core_types::{Currency, PlanTier, TransactionId, UserId, WalletId};
use crate::providers::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    #[default]
    Active,
    Frozen,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "ACTIVE",
            WalletStatus::Frozen => "FROZEN",
        }
    }
}

impl FromStr for WalletStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(WalletStatus::Active),
            "FROZEN" => Ok(WalletStatus::Frozen),
            other => Err(format!("Unknown wallet status: {}", other)),
        }
    }
}

/// One balance per (user, currency).
///
/// `held` is reserved by in-flight withdrawals and transfers;
/// `available = balance - held`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: Currency,
    #[schema(value_type = String)]
    pub balance: Decimal,
    #[schema(value_type = String)]
    pub held: Decimal,
    pub deposit_address: Option<String>,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::new(),
            user_id,
            currency,
            balance: Decimal::ZERO,
            held: Decimal::ZERO,
            deposit_address: None,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn available(&self) -> Decimal {
        self.balance - self.held
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
    SwapIn,
    SwapOut,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "DEPOSIT",
            TxType::Withdrawal => "WITHDRAWAL",
            TxType::TransferIn => "TRANSFER_IN",
            TxType::TransferOut => "TRANSFER_OUT",
            TxType::SwapIn => "SWAP_IN",
            TxType::SwapOut => "SWAP_OUT",
        }
    }

    /// Whether settlement adds to the wallet balance.
    pub fn is_credit(&self) -> bool {
        matches!(self, TxType::Deposit | TxType::TransferIn | TxType::SwapIn)
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TxType::Deposit),
            "WITHDRAWAL" => Ok(TxType::Withdrawal),
            "TRANSFER_IN" => Ok(TxType::TransferIn),
            "TRANSFER_OUT" => Ok(TxType::TransferOut),
            "SWAP_IN" => Ok(TxType::SwapIn),
            "SWAP_OUT" => Ok(TxType::SwapOut),
            other => Err(format!("Unknown transaction type: {}", other)),
        }
    }
}

/// What a deposit pays for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositPurpose {
    /// Credit the wallet
    #[default]
    WalletFunding,
    /// Pay for an in-app feature; nothing is credited
    FeaturePayment { feature: String },
}

/// Free-form details kept next to a transaction.
///
/// Typed fields cover what the settlement code reads back; anything else
/// lands in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<DepositPurpose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Reference issued by the provider at initialization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    /// Amount before fee
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_rate: Option<Decimal>,
    /// Market rate before spread (swaps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_revenue: Option<Decimal>,
    /// Provider-side proof of settlement (payment id, chain tx hash)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_destination: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_reconciliation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation_note: Option<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TransactionMetadata {
    pub fn is_feature_payment(&self) -> bool {
        matches!(self.purpose, Some(DepositPurpose::FeaturePayment { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub tx_type: TxType,
    /// Net of fee
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: Currency,
    #[schema(value_type = String)]
    pub fee: Decimal,
    pub status: TxStatus,
    /// Internal reference; shared by the two legs of a swap or transfer
    pub reference: String,
    /// Provider reference, unique when present
    pub external_reference: Option<String>,
    /// Client-supplied key, unique per user
    pub idempotency_key: Option<String>,
    #[schema(value_type = Option<String>)]
    pub exchange_rate: Option<Decimal>,
    /// Amount actually charged by the provider, in `charged_currency`
    #[schema(value_type = Option<String>)]
    pub charged_amount: Option<Decimal>,
    pub charged_currency: Option<Currency>,
    #[schema(value_type = Object)]
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        wallet_id: WalletId,
        user_id: UserId,
        tx_type: TxType,
        amount: Decimal,
        currency: Currency,
        fee: Decimal,
        reference: String,
        metadata: TransactionMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            wallet_id,
            user_id,
            tx_type,
            amount,
            currency,
            fee,
            status: TxStatus::Pending,
            reference,
            external_reference: None,
            idempotency_key: None,
            exchange_rate: None,
            charged_amount: None,
            charged_currency: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount that left (or will leave) the wallet for a withdrawal.
    pub fn gross_amount(&self) -> Decimal {
        self.metadata.gross_amount.unwrap_or(self.amount + self.fee)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevenueKind {
    Fee,
    Spread,
}

impl RevenueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevenueKind::Fee => "FEE",
            RevenueKind::Spread => "SPREAD",
        }
    }
}

impl FromStr for RevenueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FEE" => Ok(RevenueKind::Fee),
            "SPREAD" => Ok(RevenueKind::Spread),
            other => Err(format!("Unknown revenue kind: {}", other)),
        }
    }
}

/// Platform income, at most one row per (transaction, kind).
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RevenueEntry {
    pub transaction_id: TransactionId,
    pub kind: RevenueKind,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: Currency,
    pub tx_type: TxType,
    pub created_at: DateTime<Utc>,
}

/// Result of an attempt to move a PENDING credit to COMPLETED.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Applied(Transaction),
    /// Another delivery got there first
    AlreadyCompleted(Transaction),
    /// Terminal in the other direction
    Rejected(Transaction),
}
