//! Contract with the custodial Ark wallet.
//!
//! The custodial side holds VTXOs with an Ark operator and reaches Lightning
//! through a submarine/reverse swap provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CustodialError;

// ═══════════════════════════════════════════════════════════════════════════════
// BALANCES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardingBalance {
    #[serde(default)]
    pub confirmed: u64,
    #[serde(default)]
    pub unconfirmed: u64,
    #[serde(default)]
    pub total: u64,
}

/// Balance breakdown as reported by the custodial wallet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceComponents {
    #[serde(default)]
    pub boarding: BoardingBalance,
    #[serde(default)]
    pub settled: u64,
    #[serde(default)]
    pub preconfirmed: u64,
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub recoverable: u64,
    #[serde(default)]
    pub total: Option<u64>,
}

impl BalanceComponents {
    pub fn reconciled(&self) -> u64 {
        reconcile_balance(self)
    }
}

/// Single spendable figure from overlapping balance components.
///
/// With boarded funds and an active off-chain balance the reported total
/// double counts boarding, so only `available + recoverable` is used.
/// Otherwise the reported total wins when present.
pub fn reconcile_balance(components: &BalanceComponents) -> u64 {
    let boarding = &components.boarding;
    let boarded = boarding.confirmed > 0 || boarding.total > 0;
    let active = components.settled > 0 || components.available > 0;
    let spendable = components.available.saturating_add(components.recoverable);
    if boarded && active {
        spendable
    } else {
        components.total.unwrap_or(spendable)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIGHTNING
// ═══════════════════════════════════════════════════════════════════════════════

/// Reverse swap waiting for the invoice to be paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSwap {
    pub id: String,
    pub invoice: String,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningInvoice {
    pub invoice: String,
    pub pending_swap: PendingSwap,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub swap_id: String,
    pub amount: u64,
    pub txid: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub amount: u64,
    pub fee: u64,
    pub preimage: Option<String>,
    pub txid: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VTXOS
// ═══════════════════════════════════════════════════════════════════════════════

/// Virtual UTXO held with the Ark operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    #[serde(default)]
    pub recoverable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutput {
    pub address: String,
    pub amount: u64,
}

/// Cooperative settlement of VTXOs into on-chain outputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub inputs: Vec<Vtxo>,
    pub outputs: Vec<ExitOutput>,
}

/// Operations the bridge needs from the custodial wallet.
#[async_trait]
pub trait CustodialWallet: Send + Sync {
    async fn get_balance(&self) -> Result<BalanceComponents, CustodialError>;

    /// Create an invoice backed by a reverse swap into this wallet.
    async fn create_lightning_invoice(
        &self,
        amount: u64,
        description: &str,
    ) -> Result<LightningInvoice, CustodialError>;

    /// Wait until the swap's invoice is paid and claim the funds.
    async fn wait_and_claim(&self, swap: &PendingSwap) -> Result<ClaimReceipt, CustodialError>;

    /// Pay a Lightning invoice, spending at most `max_fee` in routing fees.
    async fn pay_invoice(
        &self,
        invoice: &str,
        max_fee: u64,
    ) -> Result<PaymentReceipt, CustodialError>;

    /// Spendable VTXOs, recoverable ones included.
    async fn list_vtxos(&self) -> Result<Vec<Vtxo>, CustodialError>;

    /// Settle VTXOs cooperatively; returns the on-chain txid.
    async fn settle(&self, request: &SettlementRequest) -> Result<String, CustodialError>;

    /// Pay `amount` to another Ark address off-chain; returns the Ark txid.
    async fn send_offchain(&self, address: &str, amount: u64) -> Result<String, CustodialError>;

    /// Move confirmed boarding UTXOs into VTXOs; returns the round txid.
    async fn onboard(&self) -> Result<String, CustodialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boarded_and_active_uses_available_plus_recoverable() {
        let balance = BalanceComponents {
            boarding: BoardingBalance {
                confirmed: 5_000,
                unconfirmed: 0,
                total: 5_000,
            },
            settled: 2_000,
            available: 2_000,
            recoverable: 300,
            total: Some(7_300),
            ..Default::default()
        };
        assert_eq!(balance.reconciled(), 2_300);
    }

    #[test]
    fn test_total_wins_without_active_balance() {
        let balance = BalanceComponents {
            boarding: BoardingBalance {
                confirmed: 5_000,
                unconfirmed: 0,
                total: 5_000,
            },
            total: Some(5_000),
            ..Default::default()
        };
        assert_eq!(balance.reconciled(), 5_000);
    }

    #[test]
    fn test_falls_back_to_components_without_total() {
        let balance = BalanceComponents {
            available: 800,
            recoverable: 200,
            ..Default::default()
        };
        assert_eq!(balance.reconciled(), 1_000);
    }

    #[test]
    fn test_deserialize_sparse_balance() {
        let balance: BalanceComponents =
            serde_json::from_str(r#"{"available": 42, "boarding": {"total": 1}}"#).unwrap();
        assert_eq!(balance.available, 42);
        assert_eq!(balance.total, None);
        assert_eq!(balance.reconciled(), 42);
    }
}
