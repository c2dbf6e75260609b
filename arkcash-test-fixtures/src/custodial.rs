//! In-process custodial Ark wallet.
//!
//! Balance is the sum of held VTXOs. Payments and claims go through the shared
//! [`MockLightning`], so a melt by the ledger shows up here as a claimable
//! reverse swap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use arkcash_bridge::{
    BalanceComponents, BoardingBalance, ClaimReceipt, CustodialError, CustodialWallet,
    LightningInvoice, PaymentReceipt, PendingSwap, SettlementRequest, Vtxo,
};

use crate::lightning::MockLightning;

#[derive(Debug, Default)]
struct CustodialState {
    vtxos: Vec<Vtxo>,
    next_vtxo: u64,
    boarding: BoardingBalance,
    routing_fee: u64,
    unavailable: bool,
    next_swap: u64,
    payments: Vec<String>,
    settlements: Vec<SettlementRequest>,
    transfers: Vec<(String, u64)>,
    rounds: u64,
}

pub struct MockCustodial {
    lightning: Arc<MockLightning>,
    claim_timeout: Duration,
    state: Mutex<CustodialState>,
}

impl MockCustodial {
    pub fn new(lightning: Arc<MockLightning>) -> Arc<Self> {
        Arc::new(Self {
            lightning,
            claim_timeout: Duration::from_secs(60),
            state: Mutex::new(CustodialState::default()),
        })
    }

    /// Wallet holding a single VTXO worth `amount`.
    pub fn with_balance(lightning: Arc<MockLightning>, amount: u64) -> Arc<Self> {
        let wallet = Self::new(lightning);
        wallet.fund(amount);
        wallet
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TEST CONTROLS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn fund(&self, amount: u64) {
        let mut state = self.lock();
        push_vtxo(&mut state, amount);
    }

    pub fn set_boarding(&self, boarding: BoardingBalance) {
        self.lock().boarding = boarding;
    }

    /// Routing fee charged on every outgoing payment.
    pub fn set_routing_fee(&self, fee: u64) {
        self.lock().routing_fee = fee;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn balance(&self) -> u64 {
        self.lock().vtxos.iter().map(|v| v.value).sum()
    }

    /// Invoices paid by this wallet.
    pub fn payments(&self) -> Vec<String> {
        self.lock().payments.clone()
    }

    pub fn settlements(&self) -> Vec<SettlementRequest> {
        self.lock().settlements.clone()
    }

    /// Off-chain payments as `(address, amount)`.
    pub fn transfers(&self) -> Vec<(String, u64)> {
        self.lock().transfers.clone()
    }

    fn lock(&self) -> MutexGuard<'_, CustodialState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(state: &CustodialState) -> Result<(), CustodialError> {
        if state.unavailable {
            return Err(CustodialError::Unavailable("ark server unreachable".to_string()));
        }
        Ok(())
    }
}

fn push_vtxo(state: &mut CustodialState, value: u64) {
    state.next_vtxo += 1;
    let txid = hex::encode(Sha256::digest(format!("vtxo:{}", state.next_vtxo)));
    state.vtxos.push(Vtxo {
        txid,
        vout: 0,
        value,
        recoverable: false,
    });
}

/// Spend `amount` from the held VTXOs, keeping the remainder as one change VTXO.
fn debit(state: &mut CustodialState, amount: u64) -> Result<(), CustodialError> {
    let total: u64 = state.vtxos.iter().map(|v| v.value).sum();
    if total < amount {
        return Err(CustodialError::Rejected(format!(
            "insufficient funds: have {total}, need {amount}"
        )));
    }
    state.vtxos.clear();
    if total > amount {
        push_vtxo(state, total - amount);
    }
    Ok(())
}

#[async_trait]
impl CustodialWallet for MockCustodial {
    async fn get_balance(&self) -> Result<BalanceComponents, CustodialError> {
        let state = self.lock();
        Self::check_available(&state)?;
        let offchain: u64 = state.vtxos.iter().map(|v| v.value).sum();
        Ok(BalanceComponents {
            boarding: state.boarding.clone(),
            settled: offchain,
            preconfirmed: 0,
            available: offchain,
            recoverable: 0,
            total: Some(offchain + state.boarding.total),
        })
    }

    async fn create_lightning_invoice(
        &self,
        amount: u64,
        _description: &str,
    ) -> Result<LightningInvoice, CustodialError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.next_swap += 1;
        let invoice = self.lightning.create_invoice(amount);
        Ok(LightningInvoice {
            invoice: invoice.clone(),
            pending_swap: PendingSwap {
                id: format!("swap-{:04}", state.next_swap),
                invoice,
                amount,
            },
        })
    }

    async fn wait_and_claim(&self, swap: &PendingSwap) -> Result<ClaimReceipt, CustodialError> {
        let amount = tokio::time::timeout(self.claim_timeout, self.lightning.wait_paid(&swap.invoice))
            .await
            .map_err(|_| CustodialError::ClaimFailed(format!("swap {} expired", swap.id)))?
            .map_err(CustodialError::ClaimFailed)?;

        let mut state = self.lock();
        push_vtxo(&mut state, amount);
        Ok(ClaimReceipt {
            swap_id: swap.id.clone(),
            amount,
            txid: state.vtxos.last().map(|v| v.txid.clone()),
        })
    }

    async fn pay_invoice(
        &self,
        invoice: &str,
        max_fee: u64,
    ) -> Result<PaymentReceipt, CustodialError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let amount = self
            .lightning
            .invoice_amount(invoice)
            .ok_or_else(|| CustodialError::SwapFailed("unknown invoice".to_string()))?;
        let fee = state.routing_fee;
        if fee > max_fee {
            return Err(CustodialError::SwapFailed(format!(
                "routing fee {fee} exceeds limit {max_fee}"
            )));
        }

        debit(&mut state, amount + fee)?;
        self.lightning.pay(invoice).map_err(CustodialError::SwapFailed)?;
        state.payments.push(invoice.to_string());

        Ok(PaymentReceipt {
            amount,
            fee,
            preimage: Some(hex::encode(Sha256::digest(invoice.as_bytes()))),
            txid: None,
        })
    }

    async fn list_vtxos(&self) -> Result<Vec<Vtxo>, CustodialError> {
        let state = self.lock();
        Self::check_available(&state)?;
        Ok(state.vtxos.clone())
    }

    async fn settle(&self, request: &SettlementRequest) -> Result<String, CustodialError> {
        let mut state = self.lock();
        Self::check_available(&state)?;

        for input in &request.inputs {
            if !state.vtxos.contains(input) {
                return Err(CustodialError::Rejected(format!("unknown vtxo {}", input.txid)));
            }
        }
        let inputs: u64 = request.inputs.iter().map(|v| v.value).sum();
        let outputs: u64 = request.outputs.iter().map(|o| o.amount).sum();
        if outputs > inputs {
            return Err(CustodialError::Rejected("outputs exceed inputs".to_string()));
        }

        state.vtxos.retain(|v| !request.inputs.contains(v));
        if inputs > outputs {
            push_vtxo(&mut state, inputs - outputs);
        }
        state.settlements.push(request.clone());

        let txid = hex::encode(Sha256::digest(format!("settle:{}", state.settlements.len())));
        Ok(txid)
    }

    async fn send_offchain(&self, address: &str, amount: u64) -> Result<String, CustodialError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        debit(&mut state, amount)?;
        state.transfers.push((address.to_string(), amount));
        Ok(hex::encode(Sha256::digest(format!("ark:{}", state.transfers.len()))))
    }

    async fn onboard(&self) -> Result<String, CustodialError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let confirmed = state.boarding.confirmed;
        if confirmed == 0 {
            return Err(CustodialError::Rejected("no confirmed boarding utxos".to_string()));
        }

        push_vtxo(&mut state, confirmed);
        state.boarding.confirmed = 0;
        state.boarding.total = state.boarding.total.saturating_sub(confirmed);
        state.rounds += 1;
        Ok(hex::encode(Sha256::digest(format!("round:{}", state.rounds))))
    }
}
