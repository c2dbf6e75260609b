//! Error types for the swap bridge.

use arkcash_ledger::LedgerError;
use thiserror::Error;

use crate::saga::SagaStep;

/// Failures reported by a custodial wallet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodialError {
    #[error("custodial wallet unavailable: {0}")]
    Unavailable(String),

    #[error("custodial wallet rejected request: {0}")]
    Rejected(String),

    #[error("lightning swap failed: {0}")]
    SwapFailed(String),

    #[error("claim failed: {0}")]
    ClaimFailed(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    // ═══════════════════════════════════════════════════════════════════════════════
    // INPUT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("invalid bitcoin address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // SAGA ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("swap {id} already in progress ({step:?})")]
    SagaInProgress { id: u64, step: SagaStep },

    #[error("insufficient custodial balance: required {required}, available {available}")]
    InsufficientCustodialBalance { required: u64, available: u64 },

    #[error("mint did not confirm payment for quote {quote_id} after {attempts} checks; mint it later")]
    PaymentConfirmationTimeout { quote_id: String, attempts: u32 },

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXIT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("insufficient vtxos: required {required}, found {available}")]
    InsufficientVtxos { required: u64, available: u64 },

    // ═══════════════════════════════════════════════════════════════════════════════
    // UPSTREAM ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("custodial error: {0}")]
    Custodial(#[from] CustodialError),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
