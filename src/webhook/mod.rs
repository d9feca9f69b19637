//! Inbound provider callbacks.
//!
//! Gate order: signature, event filter, provider re-verification,
//! idempotency, dispatch. A gate that fails stops processing with no side
//! effects. Only signature and payload rejections produce non-2xx; every
//! other outcome tells the provider to stop retrying.

pub mod processor;
pub mod signature;

pub use processor::{WebhookOutcome, WebhookProcessor};
pub use signature::{SignatureError, compute_signature, verify_signature};

use thiserror::Error;

/// Rejections at the boundary. Nothing was read from or written to the ledger.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WebhookError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Missing signature header")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            WebhookError::MissingSignature => "MISSING_SIGNATURE",
            WebhookError::InvalidSignature => "INVALID_SIGNATURE",
            WebhookError::InvalidPayload(_) => "INVALID_PAYLOAD",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WebhookError::UnknownProvider(_) => 404,
            WebhookError::MissingSignature | WebhookError::InvalidSignature => 401,
            WebhookError::InvalidPayload(_) => 400,
        }
    }
}

impl From<SignatureError> for WebhookError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::Missing => WebhookError::MissingSignature,
            SignatureError::Malformed | SignatureError::Mismatch => WebhookError::InvalidSignature,
        }
    }
}
