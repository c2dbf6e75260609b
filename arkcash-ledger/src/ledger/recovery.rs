//! Counter collision recovery.
//!
//! When the mint reports that outputs at the current counter were already
//! signed, the ledger tries, in order:
//!
//! 1. skip-ahead: mint again at `counter + collision_skip`
//! 2. targeted: restore the colliding counter alone
//! 3. wide: restore the configured window
//!
//! The counter only moves on a step that succeeds. After the skip-ahead
//! fails the quote is recorded as used so it is never minted twice.
//!
//! A quote the mint reports as already issued, or one the wallet already
//! recorded as used, was minted by a session that crashed before persisting
//! its proofs. Those outputs sit at the current counter or just below it, so
//! the engine restores that counter, then the band below it, then the wide
//! window.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use super::{next_counter, ProofLedger};
use crate::error::{LedgerError, LedgerResult};
use crate::types::{MintOutcome, Proof, RecoveryPath};

/// Result of restoring a counter window.
pub(super) struct RangeScan {
    pub found: usize,
    /// Restored proofs the wallet already holds.
    pub held: usize,
    /// Restored proofs that are neither held nor spent.
    pub candidates: Vec<Proof>,
}

impl ProofLedger {
    pub(super) async fn recover_collision(
        &mut self,
        amount: u64,
        quote_id: &str,
    ) -> LedgerResult<MintOutcome> {
        let base = self.counter;
        let recovery = self.config.recovery.clone();
        warn!(quote = %quote_id, counter = base, "counter collision, starting recovery");

        let retry = base
            .checked_add(recovery.collision_skip)
            .filter(|counter| counter.checked_add(1).is_some());
        match retry {
            Some(retry_counter) => match self.mint_at(amount, quote_id, retry_counter).await {
                Ok(proofs) => {
                    let proofs = self.finish_mint(quote_id, retry_counter, proofs)?;
                    info!(
                        quote = %quote_id,
                        counter = retry_counter,
                        proofs = proofs.len(),
                        "minted after skipping ahead"
                    );
                    return Ok(MintOutcome {
                        proofs,
                        counter: Some(retry_counter),
                        recovery: Some(RecoveryPath::SkipAhead {
                            counter: retry_counter,
                        }),
                    });
                }
                Err(e) => warn!(counter = retry_counter, error = %e, "skip-ahead mint failed"),
            },
            None => warn!(counter = base, "skip-ahead counter out of range"),
        }

        self.record_quote(quote_id)?;

        match self.recover_range(base, 1).await {
            Ok(proofs) if !proofs.is_empty() => {
                self.set_counter(next_counter(base, 1)?)?;
                info!(counter = base, proofs = proofs.len(), "recovered colliding outputs");
                return Ok(MintOutcome {
                    proofs,
                    counter: Some(base),
                    recovery: Some(RecoveryPath::Targeted { counter: base }),
                });
            }
            Ok(_) => debug!(counter = base, "targeted restore found nothing unspent"),
            Err(e) => warn!(counter = base, error = %e, "targeted restore failed"),
        }

        let (start, count) = (recovery.wide_scan_start, recovery.wide_scan_count);
        match self.recover_range(start, count).await {
            Ok(proofs) if !proofs.is_empty() => {
                info!(start, count, proofs = proofs.len(), "recovered proofs from wide scan");
                return Ok(MintOutcome {
                    proofs,
                    counter: None,
                    recovery: Some(RecoveryPath::Wide { start, count }),
                });
            }
            Ok(_) => debug!(start, count, "wide restore found nothing unspent"),
            Err(e) => warn!(start, count, error = %e, "wide restore failed"),
        }

        error!(quote = %quote_id, counter = base, "mint recovery exhausted");
        Err(LedgerError::MintRecoveryExhausted {
            quote_id: quote_id.to_string(),
            counter: base,
        })
    }

    /// The mint already issued this quote but its proofs never reached the
    /// store. The quote is recorded as used whatever the outcome.
    pub(super) async fn recover_issued_quote(
        &mut self,
        quote_id: &str,
    ) -> LedgerResult<MintOutcome> {
        let base = self.counter;
        warn!(quote = %quote_id, counter = base, "quote already issued, recovering its outputs");
        self.record_quote(quote_id)?;

        match self.recover_range(base, 1).await {
            Ok(proofs) if !proofs.is_empty() => {
                self.set_counter(next_counter(base, 1)?)?;
                info!(quote = %quote_id, counter = base, proofs = proofs.len(), "recovered issued outputs");
                return Ok(MintOutcome {
                    proofs,
                    counter: Some(base),
                    recovery: Some(RecoveryPath::Targeted { counter: base }),
                });
            }
            Ok(_) => debug!(counter = base, "nothing unspent at current counter"),
            Err(e) => warn!(counter = base, error = %e, "targeted restore failed"),
        }

        match self.recover_unpersisted().await {
            Ok(proofs) if !proofs.is_empty() => {
                info!(quote = %quote_id, proofs = proofs.len(), "recovered proofs for issued quote");
                return Ok(MintOutcome {
                    proofs,
                    counter: None,
                    recovery: Some(RecoveryPath::Replay),
                });
            }
            Ok(_) => debug!(quote = %quote_id, "no unpersisted outputs found"),
            Err(e) => warn!(quote = %quote_id, error = %e, "restore scan failed"),
        }

        error!(quote = %quote_id, counter = base, "issued quote could not be recovered");
        Err(LedgerError::MintRecoveryExhausted {
            quote_id: quote_id.to_string(),
            counter: base,
        })
    }

    /// A used quote cannot be minted again; look for its proofs instead.
    pub(super) async fn recover_replayed_quote(
        &mut self,
        quote_id: &str,
    ) -> LedgerResult<MintOutcome> {
        let proofs = self.recover_unpersisted().await?;
        if proofs.is_empty() {
            return Err(LedgerError::QuoteAlreadyUsed(quote_id.to_string()));
        }

        info!(quote = %quote_id, proofs = proofs.len(), "recovered proofs for used quote");
        Ok(MintOutcome {
            proofs,
            counter: None,
            recovery: Some(RecoveryPath::Replay),
        })
    }

    /// Restore the band just below the counter, then the wide window.
    ///
    /// A mint persists its counter before its proofs, so outputs lost in a
    /// crash sit just below the counter wherever it has moved to.
    async fn recover_unpersisted(&mut self) -> LedgerResult<Vec<Proof>> {
        let band = self.config.recovery.collision_skip.saturating_add(1);
        let recent_start = self.counter.saturating_sub(band);
        let recent_count = self.counter - recent_start;
        if recent_count > 0 {
            let proofs = self.recover_range(recent_start, recent_count).await?;
            if !proofs.is_empty() {
                debug!(start = recent_start, count = recent_count, "recovered below counter");
                return Ok(proofs);
            }
        }

        let (start, count) = (
            self.config.recovery.wide_scan_start,
            self.config.recovery.wide_scan_count,
        );
        self.recover_range(start, count).await
    }

    /// Restore a counter window and add what is unspent and unheld.
    async fn recover_range(&mut self, start: u64, count: u64) -> LedgerResult<Vec<Proof>> {
        let scan = self.scan_range(start, count).await?;
        let added = self.append_proofs(scan.candidates)?;
        if !added.is_empty() {
            self.schedule_verification();
        }
        Ok(added)
    }

    pub(super) async fn scan_range(&self, start: u64, count: u64) -> LedgerResult<RangeScan> {
        let keyset_id = match self.mint.active_keyset_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not fetch active keyset, restoring without one");
                None
            }
        };

        let restored = self.mint.restore(start, count, keyset_id.as_deref()).await?;
        let found = restored.len();

        let held_secrets: HashSet<&str> = self.proofs.iter().map(|p| p.secret.as_str()).collect();
        let held = restored
            .iter()
            .filter(|p| held_secrets.contains(p.secret.as_str()))
            .count();

        let mut seen = HashSet::new();
        let fresh: Vec<Proof> = restored
            .into_iter()
            .filter(|p| !held_secrets.contains(p.secret.as_str()) && seen.insert(p.secret.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(RangeScan {
                found,
                held,
                candidates: Vec::new(),
            });
        }

        let spent: HashSet<String> = self
            .mint
            .check_proofs_spent(&fresh)
            .await?
            .into_iter()
            .map(|p| p.secret)
            .collect();
        let candidates = fresh
            .into_iter()
            .filter(|p| !spent.contains(&p.secret))
            .collect();

        Ok(RangeScan {
            found,
            held,
            candidates,
        })
    }
}
