//! arkcash-bridge
//!
//! Moves value between a custodial Ark wallet and an ecash [`ProofLedger`]
//! over Lightning, tracking each transfer as a single-flight swap saga.
//!
//! | Direction | Invoice issued by | Invoice paid by          |
//! |-----------|-------------------|--------------------------|
//! | Encrypt   | mint (mint quote) | custodial wallet         |
//! | Decrypt   | custodial wallet  | ledger (melt via mint)   |
//!
//! [`ProofLedger`]: arkcash_ledger::ProofLedger

pub mod bridge;
pub mod config;
pub mod custodial;
pub mod error;
pub mod exit;
pub mod saga;

pub use bridge::{BridgeEvent, DecryptReceipt, EncryptReceipt, SwapBridge};
pub use config::BridgeConfig;
pub use custodial::{
    reconcile_balance, BalanceComponents, BoardingBalance, ClaimReceipt, CustodialWallet,
    ExitOutput, LightningInvoice, PaymentReceipt, PendingSwap, SettlementRequest, Vtxo,
};
pub use error::{BridgeError, BridgeResult, CustodialError};
pub use exit::{plan_exit, select_vtxos};
pub use saga::{SagaDirection, SagaStep, SagaTracker, SwapSaga};
