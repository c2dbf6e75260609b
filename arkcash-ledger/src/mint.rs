//! Contract with the remote ecash mint.
//!
//! The ledger never talks to the network itself; it drives an implementation
//! of [`MintClient`]. Outputs for `mint_tokens` are derived deterministically
//! from the wallet seed and the supplied counter, which is what makes
//! `restore` able to regenerate them.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{MeltQuote, MeltResult, MintQuote, MintQuoteStatus, Proof, SendSplit};

/// Message fragments of transport failures rather than mint decisions.
const UNAVAILABLE_HINTS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "failed to fetch",
    "unreachable",
    "unavailable",
];

/// Failures reported by a mint client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintClientError {
    /// Outputs derived at the requested counter were signed before.
    #[error("outputs have already been signed")]
    AlreadySigned,

    #[error("token already spent")]
    TokenAlreadySpent,

    #[error("quote not paid: {0}")]
    QuoteNotPaid(String),

    /// The mint already issued proofs for this quote.
    #[error("quote already issued: {0}")]
    QuoteIssued(String),

    #[error("mint unavailable: {0}")]
    Unavailable(String),

    #[error("mint rejected request: {0}")]
    Rejected(String),
}

impl MintClientError {
    pub fn is_counter_collision(&self) -> bool {
        matches!(self, MintClientError::AlreadySigned)
    }

    /// Classify a mint error message for clients that only receive free text.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("already been signed") || lower.contains("outputs already signed") {
            MintClientError::AlreadySigned
        } else if lower.contains("already issued") || lower.contains("already been issued") {
            MintClientError::QuoteIssued(message.to_string())
        } else if lower.contains("already spent") {
            MintClientError::TokenAlreadySpent
        } else if lower.contains("not paid") || lower.contains("unpaid") {
            MintClientError::QuoteNotPaid(message.to_string())
        } else if UNAVAILABLE_HINTS.iter().any(|hint| lower.contains(hint)) {
            MintClientError::Unavailable(message.to_string())
        } else {
            MintClientError::Rejected(message.to_string())
        }
    }
}

/// Operations the ledger needs from a mint.
#[async_trait]
pub trait MintClient: Send + Sync {
    /// Keyset new outputs are signed under.
    async fn active_keyset_id(&self) -> Result<String, MintClientError>;

    async fn create_mint_quote(&self, amount: u64) -> Result<MintQuote, MintClientError>;

    async fn check_mint_quote(&self, quote_id: &str) -> Result<MintQuoteStatus, MintClientError>;

    /// Mint `amount` for a paid quote with outputs derived at `counter`.
    async fn mint_tokens(
        &self,
        amount: u64,
        quote_id: &str,
        counter: u64,
    ) -> Result<Vec<Proof>, MintClientError>;

    /// Swap `proofs` into a set worth exactly `amount` and the change.
    async fn send(&self, amount: u64, proofs: &[Proof]) -> Result<SendSplit, MintClientError>;

    /// Redeem an encoded token into fresh proofs.
    async fn receive(&self, token: &str) -> Result<Vec<Proof>, MintClientError>;

    async fn create_melt_quote(&self, invoice: &str) -> Result<MeltQuote, MintClientError>;

    async fn melt_tokens(
        &self,
        quote: &MeltQuote,
        proofs: &[Proof],
    ) -> Result<MeltResult, MintClientError>;

    /// Subset of `proofs` the mint reports as spent.
    async fn check_proofs_spent(&self, proofs: &[Proof]) -> Result<Vec<Proof>, MintClientError>;

    /// Regenerate outputs for counters `[start, start + count)` and return
    /// whatever the mint had signed for them.
    async fn restore(
        &self,
        start: u64,
        count: u64,
        keyset_id: Option<&str>,
    ) -> Result<Vec<Proof>, MintClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_classifies_collision() {
        let err = MintClientError::from_message("Outputs have already been signed before.");
        assert!(err.is_counter_collision());
    }

    #[test]
    fn test_from_message_classifies_other_errors() {
        assert_eq!(
            MintClientError::from_message("Token already spent."),
            MintClientError::TokenAlreadySpent
        );
        assert!(matches!(
            MintClientError::from_message("quote not paid"),
            MintClientError::QuoteNotPaid(_)
        ));
        assert!(matches!(
            MintClientError::from_message("keyset inactive"),
            MintClientError::Rejected(_)
        ));
        assert!(matches!(
            MintClientError::from_message("Quote already issued."),
            MintClientError::QuoteIssued(_)
        ));
    }

    #[test]
    fn test_from_message_classifies_transport_failures() {
        for message in [
            "request timed out",
            "NetworkError when attempting to fetch resource.",
            "Failed to fetch",
            "connection reset by peer",
            "503 Service Unavailable",
        ] {
            assert!(
                matches!(
                    MintClientError::from_message(message),
                    MintClientError::Unavailable(ref m) if m == message
                ),
                "{message}"
            );
        }
        let err: crate::LedgerError = MintClientError::from_message("request timed out").into();
        assert!(err.is_transient());
    }
}
