//! In-process Lightning "network" shared by the mock mint and custodial wallet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Debug)]
struct InvoiceRecord {
    amount: u64,
    paid: bool,
}

#[derive(Debug, Default)]
struct LnState {
    invoices: HashMap<String, InvoiceRecord>,
    next: u64,
}

#[derive(Debug, Default)]
pub struct MockLightning {
    state: Mutex<LnState>,
    paid: Notify,
}

impl MockLightning {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a fresh invoice for `amount`.
    pub fn create_invoice(&self, amount: u64) -> String {
        let mut state = self.lock();
        state.next += 1;
        let invoice = format!("lnbcrt{amount}n1pmock{:08}", state.next);
        state.invoices.insert(invoice.clone(), InvoiceRecord { amount, paid: false });
        invoice
    }

    pub fn invoice_amount(&self, invoice: &str) -> Option<u64> {
        self.lock().invoices.get(invoice).map(|r| r.amount)
    }

    pub fn is_paid(&self, invoice: &str) -> bool {
        self.lock().invoices.get(invoice).is_some_and(|r| r.paid)
    }

    /// Settle an invoice. Each invoice can be paid once.
    pub fn pay(&self, invoice: &str) -> Result<u64, String> {
        let amount = {
            let mut state = self.lock();
            let record = state
                .invoices
                .get_mut(invoice)
                .ok_or_else(|| format!("unknown invoice {invoice}"))?;
            if record.paid {
                return Err("invoice already paid".to_string());
            }
            record.paid = true;
            record.amount
        };
        self.paid.notify_waiters();
        Ok(amount)
    }

    /// Resolve once `invoice` is paid.
    pub async fn wait_paid(&self, invoice: &str) -> Result<u64, String> {
        loop {
            let notified = self.paid.notified();
            {
                let state = self.lock();
                let record = state
                    .invoices
                    .get(invoice)
                    .ok_or_else(|| format!("unknown invoice {invoice}"))?;
                if record.paid {
                    return Ok(record.amount);
                }
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, LnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
