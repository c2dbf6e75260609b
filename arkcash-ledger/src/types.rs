//! Core data types shared by the ledger, the mint client and the recovery engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// PROOFS
// ═══════════════════════════════════════════════════════════════════════════════

/// A bearer ecash proof issued by the mint.
///
/// The secret is unique across the wallet and doubles as the proof's identity
/// for deduplication and spent-set removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Keyset the proof was signed under.
    #[serde(rename = "id")]
    pub keyset_id: String,
    /// Value in sats.
    pub amount: u64,
    /// Wallet-chosen secret.
    pub secret: String,
    /// Unblinded mint signature.
    #[serde(rename = "C")]
    pub c: String,
    /// Mint-defined fields (DLEQ, witness) carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Proof {
    pub fn new(
        keyset_id: impl Into<String>,
        amount: u64,
        secret: impl Into<String>,
        c: impl Into<String>,
    ) -> Self {
        Self {
            keyset_id: keyset_id.into(),
            amount,
            secret: secret.into(),
            c: c.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// Sum of proof values.
pub fn total_amount<'a>(proofs: impl IntoIterator<Item = &'a Proof>) -> u64 {
    proofs.into_iter().map(|p| p.amount).sum()
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUOTES
// ═══════════════════════════════════════════════════════════════════════════════

/// A mint quote: pay `request` and the mint will issue `amount` in proofs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote: String,
    /// Lightning invoice to pay.
    pub request: String,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MintQuoteState {
    Unpaid,
    Paid,
    Issued,
}

/// Remote view of a mint quote.
///
/// Older mints only report the boolean `paid` flag; newer ones report `state`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteStatus {
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<MintQuoteState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid: Option<bool>,
}

impl MintQuoteStatus {
    /// Whether the mint has seen the invoice paid.
    ///
    /// `Issued` counts as paid: the payment landed and the quote has already
    /// been redeemed, which the ledger handles as a replayed quote.
    pub fn is_paid(&self) -> bool {
        matches!(self.state, Some(MintQuoteState::Paid | MintQuoteState::Issued))
            || self.paid == Some(true)
    }
}

/// A melt quote: the mint pays an invoice of `amount`, reserving up to
/// `fee_reserve` for routing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuote {
    pub quote: String,
    pub amount: u64,
    pub fee_reserve: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl MeltQuote {
    /// Amount of proofs the melt consumes.
    pub fn total_needed(&self) -> Option<u64> {
        self.amount.checked_add(self.fee_reserve)
    }
}

/// Mint response to a melt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltResult {
    #[serde(default)]
    pub preimage: Option<String>,
    /// Unused fee reserve returned as fresh proofs.
    #[serde(default)]
    pub change: Vec<Proof>,
}

/// Mint response to a swap: `send` totals the requested amount, `keep` is the
/// change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSplit {
    pub send: Vec<Proof>,
    pub keep: Vec<Proof>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATION RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// How a mint that hit a counter collision was resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum RecoveryPath {
    /// Retried the mint at a counter past the collision.
    SkipAhead { counter: u64 },
    /// Restored the outputs signed at the colliding counter.
    Targeted { counter: u64 },
    /// Found unheld unspent proofs in the wide restore window.
    Wide { start: u64, count: u64 },
    /// Quote was already used; wide restore recovered its proofs.
    Replay,
}

/// Result of [`crate::ProofLedger::mint`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintOutcome {
    /// Proofs added to the held set.
    pub proofs: Vec<Proof>,
    /// Counter the outputs were derived at, when known.
    pub counter: Option<u64>,
    /// Set when the plain mint collided and recovery produced the proofs.
    pub recovery: Option<RecoveryPath>,
}

impl MintOutcome {
    pub fn amount(&self) -> u64 {
        total_amount(&self.proofs)
    }
}

/// Result of [`crate::ProofLedger::send`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendOutcome {
    /// Encoded transferable token.
    pub token: String,
    /// Proofs carried by the token.
    pub sent: Vec<Proof>,
    /// Value of the change proofs now held.
    pub change: u64,
}

/// Result of [`crate::ProofLedger::melt_for_invoice`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltReceipt {
    /// Invoice amount paid.
    pub amount: u64,
    pub fee_reserve: u64,
    /// Routing fee actually consumed.
    pub fee_paid: u64,
    /// Unused reserve returned as change.
    pub fee_refund: u64,
    pub preimage: Option<String>,
}

/// Result of [`crate::ProofLedger::restore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Proofs returned by the mint for the window.
    pub found: usize,
    /// Unspent proofs added to the held set.
    pub added: usize,
    /// Proofs the wallet already held.
    pub already_held: usize,
    /// Proofs not added because the mint reports them spent.
    pub skipped: usize,
}

/// Result of [`crate::ProofLedger::reset_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    /// Counter the next mint will use.
    pub starting_counter: u64,
    /// Whether the reset scan found previously signed outputs.
    pub prior_outputs_found: bool,
}

/// Backup of the most recently created outgoing token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedToken {
    pub token: String,
    /// Creation time, Unix milliseconds.
    pub created_at_ms: i64,
    pub minutes_ago: i64,
}
