//! Swap orchestration between the custodial wallet and the ecash ledger.
//!
//! Encrypt moves value custodial -> ecash:
//!
//! ```text
//! request_mint ──► pre-flight balance ──► custodial pays invoice ──► settle
//!      │                                                               │
//!      └──────────── poll mint quote until paid ◄──────────────────────┘
//!                              │
//!                              ▼
//!                      ledger.mint ──► refresh custodial balance
//! ```
//!
//! Decrypt moves value ecash -> custodial: the custodial wallet issues a
//! reverse-swap invoice (claimed by a background task) and the ledger melts
//! proofs to pay it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use arkcash_ledger::{LedgerError, ProofLedger, RecoveryPath};

use crate::config::BridgeConfig;
use crate::custodial::{CustodialWallet, PendingSwap};
use crate::error::{BridgeError, BridgeResult};
use crate::exit::plan_exit;
use crate::saga::{SagaDirection, SagaStep, SagaTracker, SwapSaga};

/// Reported by background tasks, drained by [`SwapBridge::process_events`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    InvoiceClaimed { swap_id: String, amount: u64 },
    ClaimFailed { swap_id: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptReceipt {
    pub saga_id: u64,
    pub amount: u64,
    pub quote_id: String,
    /// Number of proofs minted.
    pub proofs: usize,
    pub fee_buffer: u64,
    pub recovery: Option<RecoveryPath>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptReceipt {
    pub saga_id: u64,
    pub amount: u64,
    pub fee_paid: u64,
    pub fee_refund: u64,
    pub preimage: Option<String>,
}

pub struct SwapBridge {
    config: BridgeConfig,
    ledger: ProofLedger,
    custodial: Arc<dyn CustodialWallet>,
    saga: SagaTracker,
    custodial_balance: u64,
    tasks: JoinSet<()>,
    events_tx: mpsc::UnboundedSender<BridgeEvent>,
    events_rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl SwapBridge {
    pub fn new(
        config: BridgeConfig,
        ledger: ProofLedger,
        custodial: Arc<dyn CustodialWallet>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            ledger,
            custodial,
            saga: SagaTracker::new(),
            custodial_balance: 0,
            tasks: JoinSet::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ProofLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ProofLedger {
        &mut self.ledger
    }

    /// Custodial balance as of the last refresh.
    pub fn custodial_balance(&self) -> u64 {
        self.custodial_balance
    }

    pub fn saga(&self) -> Option<SwapSaga> {
        self.saga.current()
    }

    pub fn subscribe_saga(&self) -> watch::Receiver<Option<SwapSaga>> {
        self.saga.subscribe()
    }

    pub async fn refresh_custodial_balance(&mut self) -> BridgeResult<u64> {
        let components = self.custodial.get_balance().await?;
        self.custodial_balance = components.reconciled();
        debug!(balance = self.custodial_balance, "custodial balance refreshed");
        Ok(self.custodial_balance)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ENCRYPT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move `amount` from the custodial wallet into ecash.
    ///
    /// Once the custodial payment is sent, a later failure leaves the quote
    /// paid; it can be minted afterwards through the ledger.
    pub async fn encrypt(&mut self, amount: u64) -> BridgeResult<EncryptReceipt> {
        if amount == 0 {
            return Err(BridgeError::InvalidAmount(amount));
        }
        let saga_id = self.saga.begin(SagaDirection::Encrypt, amount)?;
        info!(saga = saga_id, amount, "starting encrypt");

        let result = self.run_encrypt(saga_id, amount).await;
        self.finish_saga(saga_id, &result);
        result
    }

    async fn run_encrypt(&mut self, saga_id: u64, amount: u64) -> BridgeResult<EncryptReceipt> {
        self.saga.advance(saga_id, SagaStep::CreatingInvoice);
        let quote = self.ledger.request_mint(amount).await?;
        self.saga
            .attach_invoice(saga_id, Some(quote.quote.clone()), quote.request.clone());

        let fee_buffer = self.config.fee_buffer(amount);
        let required = amount.saturating_add(fee_buffer);
        let available = self.refresh_custodial_balance().await?;
        if available < required {
            return Err(BridgeError::InsufficientCustodialBalance {
                required,
                available,
            });
        }

        self.saga.advance(saga_id, SagaStep::PayingInvoice);
        let payment = self.custodial.pay_invoice(&quote.request, fee_buffer).await?;
        info!(
            saga = saga_id,
            quote = %quote.quote,
            paid = payment.amount,
            fee = payment.fee,
            "custodial wallet paid mint invoice"
        );
        tokio::time::sleep(self.config.payment_settle_delay()).await;

        self.saga.advance(saga_id, SagaStep::WaitingConfirmation);
        self.wait_for_quote_payment(&quote.quote).await?;

        self.saga.advance(saga_id, SagaStep::Minting);
        let outcome = self.ledger.mint(amount, &quote.quote).await?;

        if let Err(e) = self.refresh_custodial_balance().await {
            warn!(error = %e, "custodial balance refresh failed after encrypt");
        }

        info!(saga = saga_id, amount, proofs = outcome.proofs.len(), "encrypt complete");
        Ok(EncryptReceipt {
            saga_id,
            amount,
            quote_id: quote.quote,
            proofs: outcome.proofs.len(),
            fee_buffer,
            recovery: outcome.recovery,
        })
    }

    /// Poll the mint until the quote reports paid. Check errors count as
    /// attempts.
    async fn wait_for_quote_payment(&self, quote_id: &str) -> BridgeResult<()> {
        let attempts = self.config.confirmation_max_attempts;
        for attempt in 1..=attempts {
            match self.ledger.check_pending_quote(quote_id).await {
                Ok(status) if status.is_paid() => {
                    info!(quote = %quote_id, attempt, "mint confirmed payment");
                    return Ok(());
                }
                Ok(status) => {
                    debug!(quote = %quote_id, attempt, state = ?status.state, "quote not paid yet")
                }
                Err(e) => warn!(quote = %quote_id, attempt, error = %e, "quote check failed"),
            }
            tokio::time::sleep(self.config.confirmation_poll_interval()).await;
        }

        error!(quote = %quote_id, attempts, "mint never confirmed payment");
        Err(BridgeError::PaymentConfirmationTimeout {
            quote_id: quote_id.to_string(),
            attempts,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DECRYPT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move `amount` from ecash back to the custodial wallet.
    pub async fn decrypt(&mut self, amount: u64) -> BridgeResult<DecryptReceipt> {
        if amount == 0 {
            return Err(BridgeError::InvalidAmount(amount));
        }
        let available = self.ledger.balance();
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            }
            .into());
        }

        let saga_id = self.saga.begin(SagaDirection::Decrypt, amount)?;
        info!(saga = saga_id, amount, "starting decrypt");

        let result = self.run_decrypt(saga_id, amount).await;
        self.finish_saga(saga_id, &result);
        result
    }

    async fn run_decrypt(&mut self, saga_id: u64, amount: u64) -> BridgeResult<DecryptReceipt> {
        self.saga.advance(saga_id, SagaStep::CreatingInvoice);
        let invoice = self
            .custodial
            .create_lightning_invoice(amount, &self.config.invoice_description)
            .await?;
        self.saga.attach_invoice(saga_id, None, invoice.invoice.clone());
        self.spawn_claim_monitor(invoice.pending_swap);

        self.saga.advance(saga_id, SagaStep::PayingInvoice);
        let receipt = self.ledger.melt_for_invoice(&invoice.invoice).await?;

        self.saga.advance(saga_id, SagaStep::WaitingConfirmation);
        tokio::time::sleep(self.config.decrypt_settle_delay()).await;
        if let Err(e) = self.refresh_custodial_balance().await {
            warn!(error = %e, "custodial balance refresh failed after decrypt");
        }

        info!(saga = saga_id, amount, fee_paid = receipt.fee_paid, "decrypt complete");
        Ok(DecryptReceipt {
            saga_id,
            amount,
            fee_paid: receipt.fee_paid,
            fee_refund: receipt.fee_refund,
            preimage: receipt.preimage,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXIT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Settle custodial VTXOs to an on-chain address. Returns the txid.
    pub async fn exit_to_onchain(&mut self, address: &str, amount: u64) -> BridgeResult<String> {
        let vtxos = self.custodial.list_vtxos().await?;
        let request = plan_exit(&vtxos, address, amount, self.config.min_exit_address_len)?;
        info!(
            amount,
            inputs = request.inputs.len(),
            "settling vtxos to on-chain address"
        );

        let txid = self.custodial.settle(&request).await?;
        if let Err(e) = self.refresh_custodial_balance().await {
            warn!(error = %e, "custodial balance refresh failed after exit");
        }
        info!(txid = %txid, "cooperative exit settled");
        Ok(txid)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ARK PAYMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pay `amount` from the custodial wallet to another Ark address.
    ///
    /// Addresses are held to the same minimum length as exit addresses.
    pub async fn send_to_ark_address(&mut self, address: &str, amount: u64) -> BridgeResult<String> {
        if amount == 0 {
            return Err(BridgeError::InvalidAmount(amount));
        }
        let address = address.trim();
        if address.len() < self.config.min_exit_address_len {
            return Err(BridgeError::InvalidAddress(address.to_string()));
        }
        let available = self.refresh_custodial_balance().await?;
        if available < amount {
            return Err(BridgeError::InsufficientCustodialBalance {
                required: amount,
                available,
            });
        }

        let txid = self.custodial.send_offchain(address, amount).await?;
        if let Err(e) = self.refresh_custodial_balance().await {
            warn!(error = %e, "custodial balance refresh failed after ark payment");
        }
        info!(txid = %txid, amount, "sent ark payment");
        Ok(txid)
    }

    /// Turn confirmed boarding UTXOs into spendable VTXOs.
    pub async fn onboard_boarding_utxos(&mut self) -> BridgeResult<String> {
        let txid = self.custodial.onboard().await?;
        let balance = self.refresh_custodial_balance().await?;
        info!(txid = %txid, balance, "onboarded boarding utxos");
        Ok(txid)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BACKGROUND
    // ═══════════════════════════════════════════════════════════════════════════

    /// Drain background events; refreshes the custodial balance after a claim.
    pub async fn process_events(&mut self) -> BridgeResult<Vec<BridgeEvent>> {
        self.reap();
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }

        if events
            .iter()
            .any(|e| matches!(e, BridgeEvent::InvoiceClaimed { .. }))
        {
            self.refresh_custodial_balance().await?;
        }
        Ok(events)
    }

    /// Wait for every background task, saga clears included.
    pub async fn wait_idle(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    pub fn shutdown(&mut self) {
        self.tasks.abort_all();
        self.ledger.shutdown();
    }

    fn finish_saga<T>(&mut self, saga_id: u64, result: &BridgeResult<T>) {
        match result {
            Ok(_) => self.saga.complete(saga_id),
            Err(e) => {
                error!(saga = saga_id, error = %e, "swap failed");
                self.saga.fail(saga_id, e.to_string());
            }
        }

        let saga = self.saga.clone();
        let delay = self.config.saga_clear_delay();
        self.reap();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            if saga.clear(saga_id) {
                debug!(saga = saga_id, "saga cleared");
            }
        });
    }

    fn spawn_claim_monitor(&mut self, swap: PendingSwap) {
        let custodial = Arc::clone(&self.custodial);
        let tx = self.events_tx.clone();
        self.tasks.spawn(async move {
            let event = match custodial.wait_and_claim(&swap).await {
                Ok(receipt) => {
                    info!(swap = %swap.id, amount = receipt.amount, "claimed lightning payment");
                    BridgeEvent::InvoiceClaimed {
                        swap_id: swap.id,
                        amount: receipt.amount,
                    }
                }
                Err(e) => {
                    error!(swap = %swap.id, error = %e, "failed to claim lightning payment");
                    BridgeEvent::ClaimFailed {
                        swap_id: swap.id,
                        reason: e.to_string(),
                    }
                }
            };
            let _ = tx.send(event);
        });
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!(error = %e, "bridge background task panicked");
                }
            }
        }
    }
}
