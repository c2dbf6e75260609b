//! The proof ledger.
//!
//! `ProofLedger` owns the held proof set, the derivation counter and the
//! bounded quote/token logs. Every mutating operation takes `&mut self`, so
//! there is exactly one writer per wallet, and every field is written through
//! to the store before the operation returns.

mod recovery;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::bounded::BoundedLog;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::mint::MintClient;
use crate::monitor::{BackgroundMonitor, MonitorEvent};
use crate::persist::{keys, LedgerStorage, RedeemedToken};
use crate::store::{KvStore, StoreError};
use crate::token::{same_mint, token_digest, Token};
use crate::types::{
    total_amount, CreatedToken, MeltReceipt, MintOutcome, MintQuote, MintQuoteStatus, Proof,
    ResetReport, RestoreReport, SendOutcome, SendSplit,
};

pub struct ProofLedger {
    config: LedgerConfig,
    mint: Arc<dyn MintClient>,
    storage: LedgerStorage,
    proofs: Vec<Proof>,
    balance: u64,
    counter: u64,
    used_quotes: BoundedLog<String>,
    redeemed: BoundedLog<RedeemedToken>,
    first_funds_at: Option<i64>,
    monitor: BackgroundMonitor,
}

impl ProofLedger {
    /// Load the wallet's persisted state.
    ///
    /// Corrupt proof or log entries are discarded with a warning; the counter
    /// falls back to 0 and collision recovery moves it forward if needed.
    /// Inside a tokio runtime the loaded proofs get a background spent-check.
    pub fn open(
        config: LedgerConfig,
        mint: Arc<dyn MintClient>,
        store: Arc<dyn KvStore>,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let storage = LedgerStorage::new(store, &config.wallet_id);

        let counter = or_discard(storage.load_counter(), || 0)?;
        let loaded = match storage.load_proofs() {
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(reason = %reason, "clearing unreadable proof set");
                storage.clear_proofs()?;
                Vec::new()
            }
            result => result?,
        };
        let used_quotes = or_discard(storage.load_used_quotes(config.used_quote_capacity), || {
            BoundedLog::new(config.used_quote_capacity)
        })?;
        let redeemed = or_discard(storage.load_redeemed(config.redeemed_token_capacity), || {
            BoundedLog::new(config.redeemed_token_capacity)
        })?;
        let first_funds_at = or_discard(storage.load_first_funds_at(), || None)?;

        let mut seen = HashSet::new();
        let proofs: Vec<Proof> = loaded
            .into_iter()
            .filter(|p| seen.insert(p.secret.clone()))
            .collect();
        let balance = total_amount(&proofs);

        info!(
            wallet = %config.wallet_id,
            mint = %config.mint_url,
            counter,
            balance,
            proofs = proofs.len(),
            "opened proof ledger"
        );

        let mut ledger = Self {
            config,
            mint,
            storage,
            proofs,
            balance,
            counter,
            used_quotes,
            redeemed,
            first_funds_at,
            monitor: BackgroundMonitor::new(),
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            ledger.schedule_verification();
        }
        Ok(ledger)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn mint_client(&self) -> &Arc<dyn MintClient> {
        &self.mint
    }

    /// Sum of held proof values.
    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn proofs(&self) -> &[Proof] {
        &self.proofs
    }

    /// Next derivation counter.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn is_quote_used(&self, quote_id: &str) -> bool {
        self.used_quotes.iter().any(|q| q == quote_id)
    }

    pub fn used_quotes(&self) -> Vec<String> {
        self.used_quotes.to_vec()
    }

    /// When the balance last went from zero to positive, Unix milliseconds.
    pub fn first_funds_at(&self) -> Option<i64> {
        self.first_funds_at
    }

    /// Time since the balance last became positive.
    pub fn time_at_rest(&self) -> Option<Duration> {
        self.first_funds_at
            .map(|at| Duration::milliseconds((Utc::now().timestamp_millis() - at).max(0)))
    }

    pub fn minutes_at_rest(&self) -> i64 {
        self.time_at_rest().map_or(0, |d| d.num_minutes())
    }

    /// Background spent-checks still in flight.
    pub fn pending_verifications(&self) -> usize {
        self.monitor.pending()
    }

    /// Backup of the most recent outgoing token.
    pub fn last_created_token(&self) -> LedgerResult<Option<CreatedToken>> {
        let now = Utc::now().timestamp_millis();
        Ok(self
            .storage
            .load_last_token()?
            .map(|(token, created_at_ms)| CreatedToken {
                token,
                created_at_ms,
                minutes_ago: (now - created_at_ms).max(0) / 60_000,
            }))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MINTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Ask the mint for an invoice worth `amount`.
    pub async fn request_mint(&self, amount: u64) -> LedgerResult<MintQuote> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let quote = self.mint.create_mint_quote(amount).await?;
        info!(quote = %quote.quote, amount, "created mint quote");
        Ok(quote)
    }

    pub async fn check_pending_quote(&self, quote_id: &str) -> LedgerResult<MintQuoteStatus> {
        Ok(self.mint.check_mint_quote(quote_id).await?)
    }

    /// Mint proofs for a paid quote.
    ///
    /// A counter collision, or a quote the mint already issued, is resolved by
    /// the recovery engine; the caller only sees success or
    /// [`LedgerError::MintRecoveryExhausted`]. A quote this wallet already
    /// consumed goes straight to a restore scan.
    pub async fn mint(&mut self, amount: u64, quote_id: &str) -> LedgerResult<MintOutcome> {
        self.apply_monitor_events()?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        if self.is_quote_used(quote_id) {
            warn!(quote = %quote_id, "quote already used, attempting recovery");
            return self.recover_replayed_quote(quote_id).await;
        }

        let counter = self.counter;
        next_counter(counter, 1)?;
        match self.mint_at(amount, quote_id, counter).await {
            Ok(proofs) => {
                let proofs = self.finish_mint(quote_id, counter, proofs)?;
                info!(quote = %quote_id, amount, counter, proofs = proofs.len(), "minted proofs");
                Ok(MintOutcome {
                    proofs,
                    counter: Some(counter),
                    recovery: None,
                })
            }
            Err(LedgerError::CounterCollision { .. }) => {
                self.recover_collision(amount, quote_id).await
            }
            Err(LedgerError::QuoteIssued(_)) => self.recover_issued_quote(quote_id).await,
            Err(e) => Err(e),
        }
    }

    async fn mint_at(&self, amount: u64, quote_id: &str, counter: u64) -> LedgerResult<Vec<Proof>> {
        match self.mint.mint_tokens(amount, quote_id, counter).await {
            Ok(proofs) if proofs.is_empty() => Err(LedgerError::MintRejected(
                "mint returned no proofs".to_string(),
            )),
            Ok(proofs) => Ok(proofs),
            Err(e) if e.is_counter_collision() => Err(LedgerError::CounterCollision { counter }),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a successful mint: counter, then quote, then proofs.
    fn finish_mint(
        &mut self,
        quote_id: &str,
        counter: u64,
        proofs: Vec<Proof>,
    ) -> LedgerResult<Vec<Proof>> {
        self.set_counter(next_counter(counter, 1)?)?;
        self.record_quote(quote_id)?;
        let added = self.append_proofs(proofs)?;
        self.schedule_verification();
        Ok(added)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SPENDING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Split off `amount` into a transferable token.
    pub async fn send(&mut self, amount: u64) -> LedgerResult<SendOutcome> {
        self.apply_monitor_events()?;
        let split = self.swap_out(amount).await?;
        let change = total_amount(&split.keep);

        let token = match Token::new(&self.config.mint_url, split.send.clone(), &self.config.unit)
            .encode()
        {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "token encoding failed, returning send proofs to wallet");
                self.append_proofs(split.send)?;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .storage
            .save_last_token(&token, Utc::now().timestamp_millis())
        {
            warn!(error = %e, "failed to back up created token");
        }
        self.schedule_verification();

        info!(amount, change, "created token");
        Ok(SendOutcome {
            token,
            sent: split.send,
            change,
        })
    }

    /// Pay a Lightning invoice from held proofs.
    pub async fn melt_for_invoice(&mut self, invoice: &str) -> LedgerResult<MeltReceipt> {
        self.apply_monitor_events()?;

        let quote = self.mint.create_melt_quote(invoice).await?;
        let needed = quote
            .total_needed()
            .ok_or(LedgerError::InvalidAmount(quote.amount))?;
        if self.balance < needed {
            return Err(LedgerError::InsufficientBalance {
                required: needed,
                available: self.balance,
            });
        }
        info!(
            quote = %quote.quote,
            amount = quote.amount,
            fee_reserve = quote.fee_reserve,
            "melting proofs"
        );

        let split = self.swap_out(needed).await?;
        let result = match self.mint.melt_tokens(&quote, &split.send).await {
            Ok(result) => result,
            Err(e) => {
                error!(quote = %quote.quote, error = %e, "melt failed");
                self.reclaim(split.send).await;
                return Err(e.into());
            }
        };

        let fee_refund = total_amount(&result.change);
        if !result.change.is_empty() {
            self.append_proofs(result.change)?;
            self.schedule_verification();
        }

        let receipt = MeltReceipt {
            amount: quote.amount,
            fee_reserve: quote.fee_reserve,
            fee_paid: quote.fee_reserve.saturating_sub(fee_refund),
            fee_refund,
            preimage: result.preimage,
        };
        info!(
            amount = receipt.amount,
            fee_paid = receipt.fee_paid,
            fee_refund,
            "melt complete"
        );
        Ok(receipt)
    }

    /// Swap held proofs into exactly `amount` plus change, keeping the change.
    ///
    /// Nothing is mutated unless the mint's split passes validation. Once it
    /// passes, the inputs are spent at the mint, so the change is held even
    /// when persisting it fails.
    async fn swap_out(&mut self, amount: u64) -> LedgerResult<SendSplit> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.proofs.is_empty() {
            return Err(LedgerError::NoProofs);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }

        let spent = self.mint.check_proofs_spent(&self.proofs).await?;
        if !spent.is_empty() {
            warn!(spent = spent.len(), "held proofs already spent, refusing to swap");
            return Err(LedgerError::ProofsAlreadySpent { proofs: spent });
        }

        let expected_change = self.balance - amount;
        let split = self.mint.send(amount, &self.proofs).await?;

        let sent = total_amount(&split.send);
        if split.send.is_empty() || sent != amount {
            error!(expected = amount, received = sent, "mint returned wrong send amount");
            return Err(LedgerError::SendAmountMismatch {
                expected: amount,
                received: sent,
            });
        }

        let change = total_amount(&split.keep);
        if expected_change > 0 && (change == 0 || change.abs_diff(expected_change) > 1) {
            error!(
                expected = expected_change,
                received = change,
                "mint returned wrong change, keeping current proofs"
            );
            return Err(LedgerError::ChangeMismatch {
                expected: expected_change,
                received: change,
            });
        }

        if let Err(e) = self.storage.save_proofs(&split.keep) {
            error!(
                error = %e,
                sent,
                change,
                "swap completed but change was not persisted, holding it in memory"
            );
            self.install_proofs(split.keep);
            return Err(LedgerError::UnsavedSwap {
                sent: split.send,
                source: e,
            });
        }
        self.install_proofs(split.keep.clone());
        Ok(split)
    }

    /// Put proofs back after a failed melt, minus any the mint reports spent.
    async fn reclaim(&mut self, proofs: Vec<Proof>) {
        let unspent = match self.mint.check_proofs_spent(&proofs).await {
            Ok(spent) => {
                let spent: HashSet<String> = spent.into_iter().map(|p| p.secret).collect();
                proofs
                    .into_iter()
                    .filter(|p| !spent.contains(&p.secret))
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, "spent-check failed, restoring all melt inputs");
                proofs
            }
        };

        match self.append_proofs(unspent) {
            Ok(restored) => info!(
                restored = restored.len(),
                amount = total_amount(&restored),
                "restored proofs after failed melt"
            ),
            Err(e) => error!(error = %e, "failed to restore proofs after failed melt"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECEIVING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Redeem a token from this wallet's mint.
    ///
    /// Submitting the same token again while its proofs are still held is a
    /// no-op returning no proofs.
    pub async fn receive(&mut self, encoded: &str) -> LedgerResult<Vec<Proof>> {
        self.apply_monitor_events()?;

        let encoded = encoded.trim();
        let token = Token::decode(encoded)?;
        if let Some(found) = token.mints().find(|m| !same_mint(m, &self.config.mint_url)) {
            return Err(LedgerError::ForeignMint {
                expected: self.config.mint_url.clone(),
                found: found.to_string(),
            });
        }

        let digest = token_digest(encoded);
        if let Some(record) = self.redeemed.iter().find(|r| r.digest == digest) {
            if record.secrets.iter().all(|s| self.holds(s)) {
                info!(digest = %digest, "token already redeemed");
                return Ok(Vec::new());
            }
        }

        let received = self.mint.receive(encoded).await?;
        let secrets: Vec<String> = received.iter().map(|p| p.secret.clone()).collect();
        let added = self.append_proofs(received)?;
        self.record_redeemed(digest, secrets)?;
        self.schedule_verification();

        info!(
            amount = total_amount(&added),
            proofs = added.len(),
            "received token"
        );
        Ok(added)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECONCILIATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Drop every held proof the mint reports spent and return the balance.
    pub async fn verify_and_reconcile(&mut self) -> LedgerResult<u64> {
        self.apply_monitor_events()?;
        if self.proofs.is_empty() {
            return Ok(0);
        }

        let spent = self.mint.check_proofs_spent(&self.proofs).await?;
        if !spent.is_empty() {
            let secrets: HashSet<&str> = spent.iter().map(|p| p.secret.as_str()).collect();
            let removed = self.remove_secrets(&secrets)?;
            warn!(removed, balance = self.balance, "removed spent proofs");
        }
        Ok(self.balance)
    }

    /// Restore counters `[start, start + count)` and add unspent proofs not
    /// already held. The counter is not touched.
    pub async fn restore(&mut self, start: u64, count: Option<u64>) -> LedgerResult<RestoreReport> {
        self.apply_monitor_events()?;
        let count = count.unwrap_or(self.config.restore_count);

        let scan = self.scan_range(start, count).await?;
        let added = self.append_proofs(scan.candidates)?;
        if !added.is_empty() {
            self.schedule_verification();
        }

        let report = RestoreReport {
            found: scan.found,
            added: added.len(),
            already_held: scan.held,
            skipped: scan.found.saturating_sub(scan.held + added.len()),
        };
        info!(
            start,
            count,
            found = report.found,
            added = report.added,
            already_held = report.already_held,
            skipped = report.skipped,
            "restore complete"
        );
        Ok(report)
    }

    /// Clear proofs, quote and token logs and pick a fresh starting counter.
    ///
    /// The counter becomes the scan window size when the mint has signed
    /// outputs in it (or the scan fails), and 0 otherwise.
    pub async fn reset_state(&mut self) -> LedgerResult<ResetReport> {
        self.monitor.shutdown();
        let _ = self.monitor.drain();

        self.storage.clear_wallet_state()?;
        let previous = self.balance;
        self.proofs.clear();
        self.balance = 0;
        self.track_time_at_rest(previous);
        self.used_quotes.clear();
        self.redeemed.clear();

        let window = self.config.recovery.reset_scan_count;
        let (starting_counter, prior_outputs_found) = match self.mint.restore(0, window, None).await {
            Ok(found) if !found.is_empty() => (window, true),
            Ok(_) => (0, false),
            Err(e) => {
                warn!(error = %e, "reset scan failed, skipping past scan window");
                (window, false)
            }
        };
        self.set_counter(starting_counter)?;

        warn!(starting_counter, prior_outputs_found, "wallet state reset");
        Ok(ResetReport {
            starting_counter,
            prior_outputs_found,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BACKGROUND
    // ═══════════════════════════════════════════════════════════════════════════

    /// Wait for in-flight background checks and apply what they found.
    pub async fn settle_background(&mut self) -> LedgerResult<()> {
        self.monitor.wait_idle().await;
        self.apply_monitor_events()
    }

    pub fn shutdown(&mut self) {
        self.monitor.shutdown();
    }

    fn schedule_verification(&mut self) {
        if !self.config.background_verify {
            return;
        }
        self.monitor.schedule_verification(
            Arc::clone(&self.mint),
            self.proofs.clone(),
            self.config.verify_delay(),
        );
    }

    fn apply_monitor_events(&mut self) -> LedgerResult<()> {
        for event in self.monitor.drain() {
            match event {
                MonitorEvent::SpentDetected { secrets } => {
                    let secrets: HashSet<&str> = secrets.iter().map(String::as_str).collect();
                    let removed = self.remove_secrets(&secrets)?;
                    if removed > 0 {
                        warn!(removed, balance = self.balance, "dropped proofs found spent in background");
                    }
                }
                MonitorEvent::VerificationFailed { reason } => {
                    debug!(reason = %reason, "background verification did not complete");
                }
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATE MUTATION
    // ═══════════════════════════════════════════════════════════════════════════

    fn holds(&self, secret: &str) -> bool {
        self.proofs.iter().any(|p| p.secret == secret)
    }

    /// Replace the held set. Storage is written before memory.
    fn commit_proofs(&mut self, proofs: Vec<Proof>) -> LedgerResult<()> {
        self.storage.save_proofs(&proofs)?;
        self.install_proofs(proofs);
        Ok(())
    }

    fn install_proofs(&mut self, proofs: Vec<Proof>) {
        let previous = self.balance;
        self.balance = total_amount(&proofs);
        self.proofs = proofs;
        self.track_time_at_rest(previous);
    }

    /// Add proofs whose secrets are not held yet. Returns the ones added.
    fn append_proofs(&mut self, incoming: Vec<Proof>) -> LedgerResult<Vec<Proof>> {
        let mut seen: HashSet<String> = self.proofs.iter().map(|p| p.secret.clone()).collect();
        let added: Vec<Proof> = incoming
            .into_iter()
            .filter(|p| seen.insert(p.secret.clone()))
            .collect();
        if added.is_empty() {
            return Ok(added);
        }

        let mut next = self.proofs.clone();
        next.extend(added.iter().cloned());
        self.commit_proofs(next)?;
        Ok(added)
    }

    fn remove_secrets(&mut self, secrets: &HashSet<&str>) -> LedgerResult<usize> {
        let next: Vec<Proof> = self
            .proofs
            .iter()
            .filter(|p| !secrets.contains(p.secret.as_str()))
            .cloned()
            .collect();
        let removed = self.proofs.len() - next.len();
        if removed > 0 {
            self.commit_proofs(next)?;
        }
        Ok(removed)
    }

    fn set_counter(&mut self, counter: u64) -> LedgerResult<()> {
        self.storage.save_counter(counter)?;
        self.counter = counter;
        Ok(())
    }

    fn record_quote(&mut self, quote_id: &str) -> LedgerResult<()> {
        if self.is_quote_used(quote_id) {
            return Ok(());
        }
        let mut next = self.used_quotes.clone();
        next.push(quote_id.to_string());
        self.storage.save_used_quotes(&next)?;
        self.used_quotes = next;
        Ok(())
    }

    fn record_redeemed(&mut self, digest: String, secrets: Vec<String>) -> LedgerResult<()> {
        let mut next = self.redeemed.clone();
        next.push(RedeemedToken { digest, secrets });
        self.storage.save_redeemed(&next)?;
        self.redeemed = next;
        Ok(())
    }

    /// Start the time-at-rest clock on 0 -> positive, clear it on -> 0.
    fn track_time_at_rest(&mut self, previous: u64) {
        let next = if previous == 0 && self.balance > 0 && self.first_funds_at.is_none() {
            Some(Utc::now().timestamp_millis())
        } else if previous > 0 && self.balance == 0 {
            None
        } else {
            return;
        };

        if let Err(e) = self.storage.save_first_funds_at(next) {
            warn!(error = %e, "failed to persist time-at-rest clock");
        }
        self.first_funds_at = next;
        match next {
            Some(_) => info!("first funds received, time at rest started"),
            None => info!("all funds spent, time at rest reset"),
        }
    }
}

/// `counter + step`, refusing to wrap.
fn next_counter(counter: u64, step: u64) -> LedgerResult<u64> {
    counter.checked_add(step).ok_or_else(|| {
        LedgerError::Store(StoreError::Corrupt {
            key: keys::COUNTER.to_string(),
            reason: format!("counter {counter} cannot advance by {step}"),
        })
    })
}

/// Treat a corrupt persisted value as absent.
fn or_discard<T>(result: Result<T, StoreError>, empty: impl FnOnce() -> T) -> LedgerResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(StoreError::Corrupt { key, reason }) => {
            warn!(key = %key, reason = %reason, "discarding corrupt persisted value");
            Ok(empty())
        }
        Err(e) => Err(e.into()),
    }
}
