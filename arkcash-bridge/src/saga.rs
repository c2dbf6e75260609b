//! Swap saga progress tracking.
//!
//! At most one saga is active at a time. Observers follow progress through a
//! `watch` channel. A finished saga stays visible until its delayed clear
//! fires; the clear only removes the saga it was scheduled for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaDirection {
    /// Custodial wallet -> ecash ledger.
    Encrypt,
    /// Ecash ledger -> custodial wallet.
    Decrypt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    CreatingInvoice,
    PayingInvoice,
    WaitingConfirmation,
    Minting,
    Complete,
    Error,
}

impl SagaStep {
    pub fn description(&self) -> &str {
        match self {
            Self::CreatingInvoice => "Creating invoice",
            Self::PayingInvoice => "Paying invoice",
            Self::WaitingConfirmation => "Waiting for payment confirmation",
            Self::Minting => "Minting ecash",
            Self::Complete => "Swap complete",
            Self::Error => "Swap failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapSaga {
    pub id: u64,
    pub direction: SagaDirection,
    pub amount: u64,
    pub step: SagaStep,
    pub quote_id: Option<String>,
    pub invoice: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Shared handle on the current saga.
#[derive(Clone)]
pub struct SagaTracker {
    state: Arc<watch::Sender<Option<SwapSaga>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for SagaTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            state: Arc::new(tx),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SwapSaga>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Option<SwapSaga> {
        self.state.borrow().clone()
    }

    /// Start a saga unless one is still running.
    pub fn begin(&self, direction: SagaDirection, amount: u64) -> BridgeResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut conflict = None;

        self.state.send_if_modified(|slot| {
            if let Some(active) = slot.as_ref().filter(|s| !s.step.is_terminal()) {
                conflict = Some((active.id, active.step));
                return false;
            }
            *slot = Some(SwapSaga {
                id,
                direction,
                amount,
                step: SagaStep::CreatingInvoice,
                quote_id: None,
                invoice: None,
                error: None,
                started_at: Utc::now(),
            });
            true
        });

        match conflict {
            Some((id, step)) => Err(BridgeError::SagaInProgress { id, step }),
            None => {
                debug!(saga = id, ?direction, amount, "saga started");
                Ok(id)
            }
        }
    }

    pub fn advance(&self, id: u64, step: SagaStep) {
        if self.update(id, |saga| saga.step = step) {
            debug!(saga = id, step = step.description(), "saga advanced");
        }
    }

    pub fn attach_invoice(&self, id: u64, quote_id: Option<String>, invoice: String) {
        self.update(id, |saga| {
            saga.quote_id = quote_id;
            saga.invoice = Some(invoice);
        });
    }

    pub fn complete(&self, id: u64) {
        self.advance(id, SagaStep::Complete);
    }

    pub fn fail(&self, id: u64, reason: String) {
        self.update(id, |saga| {
            saga.step = SagaStep::Error;
            saga.error = Some(reason);
        });
    }

    /// Drop the saga if it is still `id`. Returns whether anything was cleared.
    pub fn clear(&self, id: u64) -> bool {
        self.state.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|saga| saga.id == id) {
                *slot = None;
                true
            } else {
                false
            }
        })
    }

    fn update(&self, id: u64, apply: impl FnOnce(&mut SwapSaga)) -> bool {
        self.state.send_if_modified(|slot| match slot {
            Some(saga) if saga.id == id => {
                apply(saga);
                true
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_saga_rejected_while_active() {
        let tracker = SagaTracker::new();
        let first = tracker.begin(SagaDirection::Encrypt, 1_000).unwrap();
        tracker.advance(first, SagaStep::PayingInvoice);

        let err = tracker.begin(SagaDirection::Decrypt, 500).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SagaInProgress { id, step: SagaStep::PayingInvoice } if id == first
        ));
    }

    #[test]
    fn test_terminal_saga_can_be_replaced() {
        let tracker = SagaTracker::new();
        let first = tracker.begin(SagaDirection::Encrypt, 1_000).unwrap();
        tracker.fail(first, "boom".to_string());

        let second = tracker.begin(SagaDirection::Decrypt, 500).unwrap();
        assert_ne!(first, second);

        // A late clear for the first saga leaves the second alone.
        assert!(!tracker.clear(first));
        assert_eq!(tracker.current().map(|s| s.id), Some(second));
        assert!(tracker.clear(second));
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_subscribers_see_steps() {
        let tracker = SagaTracker::new();
        let mut rx = tracker.subscribe();
        let id = tracker.begin(SagaDirection::Encrypt, 21).unwrap();
        tracker.attach_invoice(id, Some("q1".to_string()), "lnbc21".to_string());
        tracker.advance(id, SagaStep::Minting);

        assert!(rx.has_changed().unwrap());
        let saga = rx.borrow_and_update().clone().unwrap();
        assert_eq!(saga.step, SagaStep::Minting);
        assert_eq!(saga.quote_id.as_deref(), Some("q1"));
        assert_eq!(saga.invoice.as_deref(), Some("lnbc21"));
    }

    #[test]
    fn test_updates_for_stale_id_are_ignored() {
        let tracker = SagaTracker::new();
        let id = tracker.begin(SagaDirection::Encrypt, 21).unwrap();
        tracker.advance(id + 7, SagaStep::Complete);
        assert_eq!(tracker.current().unwrap().step, SagaStep::CreatingInvoice);
    }
}
