//! Error types for the proof ledger.

use thiserror::Error;

use crate::mint::MintClientError;
use crate::store::StoreError;
use crate::token::TokenError;
use crate::types::Proof;

/// Errors surfaced by [`crate::ProofLedger`] operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ═══════════════════════════════════════════════════════════════════════════════
    // INPUT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("token issued by foreign mint: expected {expected}, found {found}")]
    ForeignMint { expected: String, found: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // BALANCE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("no proofs held")]
    NoProofs,

    #[error("{} held proofs already spent", .proofs.len())]
    ProofsAlreadySpent { proofs: Vec<Proof> },

    #[error("token already spent")]
    TokenAlreadySpent,

    // ═══════════════════════════════════════════════════════════════════════════════
    // SWAP ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("change mismatch: expected {expected}, received {received}")]
    ChangeMismatch { expected: u64, received: u64 },

    #[error("send amount mismatch: expected {expected}, received {received}")]
    SendAmountMismatch { expected: u64, received: u64 },

    /// The mint completed the swap but the change could not be persisted.
    /// The change is held in memory; `sent` are the split-off proofs.
    #[error("swap completed but change was not persisted ({} proofs split off): {source}", .sent.len())]
    UnsavedSwap {
        sent: Vec<Proof>,
        #[source]
        source: StoreError,
    },

    // ═══════════════════════════════════════════════════════════════════════════════
    // MINT / RECOVERY ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Outputs at `counter` were already signed. Handled by the recovery
    /// engine and never returned from `mint`.
    #[error("counter collision at {counter}")]
    CounterCollision { counter: u64 },

    #[error("quote already used: {0}")]
    QuoteAlreadyUsed(String),

    /// The mint already issued this quote. Handled by the recovery engine
    /// and never returned from `mint`.
    #[error("quote already issued by the mint: {0}")]
    QuoteIssued(String),

    #[error("quote not paid: {0}")]
    QuoteNotPaid(String),

    #[error("mint recovery exhausted for quote {quote_id} at counter {counter}; run a wide restore")]
    MintRecoveryExhausted { quote_id: String, counter: u64 },

    // ═══════════════════════════════════════════════════════════════════════════════
    // REMOTE / STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("mint unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("mint rejected request: {0}")]
    MintRejected(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<MintClientError> for LedgerError {
    fn from(err: MintClientError) -> Self {
        match err {
            MintClientError::Unavailable(msg) => LedgerError::RemoteUnavailable(msg),
            MintClientError::TokenAlreadySpent => LedgerError::TokenAlreadySpent,
            MintClientError::QuoteNotPaid(quote) => LedgerError::QuoteNotPaid(quote),
            MintClientError::QuoteIssued(quote) => LedgerError::QuoteIssued(quote),
            MintClientError::AlreadySigned => {
                LedgerError::MintRejected("outputs have already been signed".to_string())
            }
            MintClientError::Rejected(msg) => LedgerError::MintRejected(msg),
        }
    }
}

impl LedgerError {
    /// Whether the failure came from an unreachable mint rather than a
    /// rejected request.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::RemoteUnavailable(_))
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
