//! Transaction status FSM
//!
//! ```text
//! PENDING ──▶ COMPLETED
//!    │
//!    └──────▶ FAILED
//! ```
//!
//! Both terminal states are absorbing. The store enforces transitions with a
//! compare-and-set on the current status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed)
    }

    /// Only PENDING may move, and only forward.
    #[inline]
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Completed) | (TxStatus::Pending, TxStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Completed => "COMPLETED",
            TxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TxStatus::Pending),
            "COMPLETED" => Ok(TxStatus::Completed),
            "FAILED" => Ok(TxStatus::Failed),
            other => Err(format!("Unknown transaction status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TxStatus::Completed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(!TxStatus::Pending.is_terminal());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Completed));
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Failed));

        for terminal in [TxStatus::Completed, TxStatus::Failed] {
            for next in [TxStatus::Pending, TxStatus::Completed, TxStatus::Failed] {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
        assert!(!TxStatus::Pending.can_transition_to(TxStatus::Pending));
    }

    #[test]
    fn test_display_and_parse() {
        for s in [TxStatus::Pending, TxStatus::Completed, TxStatus::Failed] {
            assert_eq!(s.to_string().parse::<TxStatus>().unwrap(), s);
        }
        assert!("SETTLED".parse::<TxStatus>().is_err());
    }
}
