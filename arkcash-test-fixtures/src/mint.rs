//! Deterministic in-process mint.
//!
//! Outputs minted at a counter are derived from the seed and the counter, so
//! `restore` can hand back exactly what was signed. Fault knobs cover counter
//! collisions, short change, failed melts and an unreachable mint. A mint
//! response lost in transit is simulated by calling `mint_tokens` directly.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use arkcash_ledger::{
    total_amount, MeltQuote, MeltResult, MintClient, MintClientError, MintQuote,
    MintQuoteState, MintQuoteStatus, Proof, SendSplit, Token,
};

use crate::lightning::MockLightning;

pub const MOCK_MINT_URL: &str = "https://mint.arkcash.test";
pub const MOCK_KEYSET_ID: &str = "00a1b2c3d4e5f601";

/// Power-of-two denominations for `target`, largest first.
pub fn amounts_for_target(target: u64) -> Vec<u64> {
    (0..64)
        .rev()
        .map(|bit| 1u64 << bit)
        .filter(|amount| target & amount != 0)
        .collect()
}

#[derive(Debug)]
struct QuoteRecord {
    amount: u64,
    invoice: String,
    issued: bool,
    checks: u32,
}

#[derive(Debug, Default)]
struct MintState {
    quotes: HashMap<String, QuoteRecord>,
    melt_quotes: HashMap<String, (MeltQuote, String)>,
    next_quote: u64,
    /// Outputs signed per counter.
    signed: BTreeMap<u64, Vec<Proof>>,
    /// Every proof the mint ever issued, by secret.
    issued: HashMap<String, Proof>,
    spent: HashSet<String>,
    swap_nonce: u64,
    mint_attempts: Vec<u64>,
    faults: Faults,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    change_shortfall: Option<u64>,
    fail_melt: bool,
    melt_fee_reserve: u64,
    melt_fee_paid: u64,
    confirm_after_checks: u32,
}

pub struct MockMint {
    seed: String,
    lightning: Arc<MockLightning>,
    state: Mutex<MintState>,
}

impl MockMint {
    pub fn new(lightning: Arc<MockLightning>) -> Arc<Self> {
        Arc::new(Self {
            seed: "arkcash-fixture".to_string(),
            lightning,
            state: Mutex::new(MintState::default()),
        })
    }

    pub fn standalone() -> Arc<Self> {
        Self::new(MockLightning::new())
    }

    pub fn lightning(&self) -> &Arc<MockLightning> {
        &self.lightning
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TEST CONTROLS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pay a mint quote's invoice from outside the wallet.
    pub fn pay_quote(&self, quote_id: &str) {
        let invoice = self.lock().quotes.get(quote_id).map(|q| q.invoice.clone());
        if let Some(invoice) = invoice {
            let _ = self.lightning.pay(&invoice);
        }
    }

    /// Sign outputs at `counter` as an earlier, unpersisted session would have.
    pub fn sign_at(&self, counter: u64, amount: u64) -> Vec<Proof> {
        let mut state = self.lock();
        let proofs = self.derive_outputs(counter, amount);
        for proof in &proofs {
            state.issued.insert(proof.secret.clone(), proof.clone());
        }
        state.signed.insert(counter, proofs.clone());
        proofs
    }

    /// Mark everything signed at `counter` as spent.
    pub fn spend_counter(&self, counter: u64) {
        let mut state = self.lock();
        let secrets: Vec<String> = state
            .signed
            .get(&counter)
            .map(|proofs| proofs.iter().map(|p| p.secret.clone()).collect())
            .unwrap_or_default();
        state.spent.extend(secrets);
    }

    /// Spend proofs behind the wallet's back.
    pub fn spend(&self, proofs: &[Proof]) {
        let mut state = self.lock();
        state.spent.extend(proofs.iter().map(|p| p.secret.clone()));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().faults.unavailable = unavailable;
    }

    /// Return `shortfall` sats less change on the next swap.
    pub fn short_change_once(&self, shortfall: u64) {
        self.lock().faults.change_shortfall = Some(shortfall);
    }

    pub fn set_fail_melt(&self, fail: bool) {
        self.lock().faults.fail_melt = fail;
    }

    /// Fee reserve quoted on melts and the part of it actually spent.
    pub fn set_melt_fees(&self, reserve: u64, paid: u64) {
        let mut state = self.lock();
        state.faults.melt_fee_reserve = reserve;
        state.faults.melt_fee_paid = paid.min(reserve);
    }

    /// Report quotes unpaid for the first `checks` status checks.
    pub fn confirm_after(&self, checks: u32) {
        self.lock().faults.confirm_after_checks = checks;
    }

    pub fn is_spent(&self, secret: &str) -> bool {
        self.lock().spent.contains(secret)
    }

    pub fn signed_counters(&self) -> Vec<u64> {
        self.lock().signed.keys().copied().collect()
    }

    /// Counters passed to `mint_tokens`, in call order.
    pub fn mint_attempts(&self) -> Vec<u64> {
        self.lock().mint_attempts.clone()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNALS
    // ═══════════════════════════════════════════════════════════════════════════

    fn lock(&self) -> MutexGuard<'_, MintState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_proof(&self, amount: u64, material: &str) -> Proof {
        let secret = hex::encode(Sha256::digest(format!("{}:{material}", self.seed)));
        let c = format!("02{}", hex::encode(Sha256::digest(format!("sig:{secret}"))));
        Proof::new(MOCK_KEYSET_ID, amount, secret, c)
    }

    fn derive_outputs(&self, counter: u64, amount: u64) -> Vec<Proof> {
        amounts_for_target(amount)
            .into_iter()
            .enumerate()
            .map(|(index, value)| self.make_proof(value, &format!("{counter}:{index}")))
            .collect()
    }

    fn swap_outputs(&self, state: &mut MintState, amount: u64) -> Vec<Proof> {
        state.swap_nonce += 1;
        let nonce = state.swap_nonce;
        let proofs: Vec<Proof> = amounts_for_target(amount)
            .into_iter()
            .enumerate()
            .map(|(index, value)| self.make_proof(value, &format!("swap:{nonce}:{index}")))
            .collect();
        for proof in &proofs {
            state.issued.insert(proof.secret.clone(), proof.clone());
        }
        proofs
    }

    fn check_available(state: &MintState) -> Result<(), MintClientError> {
        if state.faults.unavailable {
            return Err(MintClientError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    /// Validate inputs and return their total.
    fn check_inputs(state: &MintState, proofs: &[Proof]) -> Result<u64, MintClientError> {
        let mut seen = HashSet::new();
        for proof in proofs {
            if state.spent.contains(&proof.secret) {
                return Err(MintClientError::TokenAlreadySpent);
            }
            if !state.issued.contains_key(&proof.secret) || !seen.insert(&proof.secret) {
                return Err(MintClientError::Rejected("unknown or duplicate proof".to_string()));
            }
        }
        Ok(total_amount(proofs))
    }
}

#[async_trait]
impl MintClient for MockMint {
    async fn active_keyset_id(&self) -> Result<String, MintClientError> {
        Self::check_available(&self.lock())?;
        Ok(MOCK_KEYSET_ID.to_string())
    }

    async fn create_mint_quote(&self, amount: u64) -> Result<MintQuote, MintClientError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.next_quote += 1;
        let quote = format!("mq-{:04}", state.next_quote);
        let invoice = self.lightning.create_invoice(amount);
        state.quotes.insert(
            quote.clone(),
            QuoteRecord {
                amount,
                invoice: invoice.clone(),
                issued: false,
                checks: 0,
            },
        );
        Ok(MintQuote {
            quote,
            request: invoice,
            amount,
            expiry: None,
        })
    }

    async fn check_mint_quote(&self, quote_id: &str) -> Result<MintQuoteStatus, MintClientError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let confirm_after = state.faults.confirm_after_checks;
        let record = state
            .quotes
            .get_mut(quote_id)
            .ok_or_else(|| MintClientError::Rejected(format!("unknown quote {quote_id}")))?;
        record.checks = record.checks.saturating_add(1);

        let paid = self.lightning.is_paid(&record.invoice) && record.checks > confirm_after;
        let quote_state = if record.issued {
            MintQuoteState::Issued
        } else if paid {
            MintQuoteState::Paid
        } else {
            MintQuoteState::Unpaid
        };
        Ok(MintQuoteStatus {
            quote: quote_id.to_string(),
            state: Some(quote_state),
            paid: Some(paid || record.issued),
        })
    }

    async fn mint_tokens(
        &self,
        amount: u64,
        quote_id: &str,
        counter: u64,
    ) -> Result<Vec<Proof>, MintClientError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.mint_attempts.push(counter);

        let record = state
            .quotes
            .get(quote_id)
            .ok_or_else(|| MintClientError::Rejected(format!("unknown quote {quote_id}")))?;
        if record.issued {
            return Err(MintClientError::QuoteIssued(quote_id.to_string()));
        }
        if !self.lightning.is_paid(&record.invoice) {
            return Err(MintClientError::QuoteNotPaid(quote_id.to_string()));
        }
        if record.amount != amount {
            return Err(MintClientError::Rejected("amount does not match quote".to_string()));
        }
        if state.signed.contains_key(&counter) {
            debug!(counter, "mock mint: outputs already signed");
            return Err(MintClientError::AlreadySigned);
        }

        let proofs = self.derive_outputs(counter, amount);
        for proof in &proofs {
            state.issued.insert(proof.secret.clone(), proof.clone());
        }
        state.signed.insert(counter, proofs.clone());
        if let Some(record) = state.quotes.get_mut(quote_id) {
            record.issued = true;
        }
        Ok(proofs)
    }

    async fn send(&self, amount: u64, proofs: &[Proof]) -> Result<SendSplit, MintClientError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let total = Self::check_inputs(&state, proofs)?;
        if total < amount {
            return Err(MintClientError::Rejected("inputs below amount".to_string()));
        }

        state.spent.extend(proofs.iter().map(|p| p.secret.clone()));
        let shortfall = state.faults.change_shortfall.take().unwrap_or(0);
        let keep_amount = (total - amount).saturating_sub(shortfall);
        let send = self.swap_outputs(&mut state, amount);
        let keep = self.swap_outputs(&mut state, keep_amount);
        Ok(SendSplit { send, keep })
    }

    async fn receive(&self, token: &str) -> Result<Vec<Proof>, MintClientError> {
        let token = Token::decode(token).map_err(|e| MintClientError::Rejected(e.to_string()))?;
        let inputs: Vec<Proof> = token.proofs().cloned().collect();

        let mut state = self.lock();
        Self::check_available(&state)?;
        let total = Self::check_inputs(&state, &inputs)?;
        state.spent.extend(inputs.iter().map(|p| p.secret.clone()));
        Ok(self.swap_outputs(&mut state, total))
    }

    async fn create_melt_quote(&self, invoice: &str) -> Result<MeltQuote, MintClientError> {
        let amount = self
            .lightning
            .invoice_amount(invoice)
            .ok_or_else(|| MintClientError::Rejected("unknown invoice".to_string()))?;

        let mut state = self.lock();
        Self::check_available(&state)?;
        state.next_quote += 1;
        let quote = MeltQuote {
            quote: format!("melt-{:04}", state.next_quote),
            amount,
            fee_reserve: state.faults.melt_fee_reserve,
            expiry: None,
        };
        state
            .melt_quotes
            .insert(quote.quote.clone(), (quote.clone(), invoice.to_string()));
        Ok(quote)
    }

    async fn melt_tokens(
        &self,
        quote: &MeltQuote,
        proofs: &[Proof],
    ) -> Result<MeltResult, MintClientError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let (quote, invoice) = state
            .melt_quotes
            .get(&quote.quote)
            .cloned()
            .ok_or_else(|| MintClientError::Rejected("unknown melt quote".to_string()))?;
        if state.faults.fail_melt {
            return Err(MintClientError::Rejected("lightning payment failed".to_string()));
        }

        let total = Self::check_inputs(&state, proofs)?;
        let needed = quote.amount + quote.fee_reserve;
        if total < needed {
            return Err(MintClientError::Rejected("inputs below amount plus fee reserve".to_string()));
        }
        self.lightning
            .pay(&invoice)
            .map_err(MintClientError::Rejected)?;

        state.spent.extend(proofs.iter().map(|p| p.secret.clone()));
        let refund = total - quote.amount - state.faults.melt_fee_paid;
        let change = self.swap_outputs(&mut state, refund);
        Ok(MeltResult {
            preimage: Some(hex::encode(Sha256::digest(invoice.as_bytes()))),
            change,
        })
    }

    async fn check_proofs_spent(&self, proofs: &[Proof]) -> Result<Vec<Proof>, MintClientError> {
        let state = self.lock();
        Self::check_available(&state)?;
        Ok(proofs
            .iter()
            .filter(|p| state.spent.contains(&p.secret))
            .cloned()
            .collect())
    }

    async fn restore(
        &self,
        start: u64,
        count: u64,
        _keyset_id: Option<&str>,
    ) -> Result<Vec<Proof>, MintClientError> {
        let state = self.lock();
        Self::check_available(&state)?;
        let end = start.saturating_add(count);
        Ok(state
            .signed
            .range(start..end)
            .flat_map(|(_, proofs)| proofs.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amounts_for_target() {
        assert_eq!(amounts_for_target(13), vec![8, 4, 1]);
        assert_eq!(amounts_for_target(0), Vec::<u64>::new());
        assert_eq!(amounts_for_target(1_000).iter().sum::<u64>(), 1_000);
    }
}
