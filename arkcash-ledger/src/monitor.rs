//! Background spent-checks.
//!
//! Tasks only observe the mint and report through a channel. The ledger
//! applies the reported removals at the start of its next operation, so the
//! held set keeps a single writer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::mint::MintClient;
use crate::types::Proof;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The mint reported these held secrets as spent.
    SpentDetected { secrets: Vec<String> },
    /// The spent-check could not be completed.
    VerificationFailed { reason: String },
}

pub struct BackgroundMonitor {
    tasks: JoinSet<()>,
    tx: mpsc::UnboundedSender<MonitorEvent>,
    rx: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl Default for BackgroundMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundMonitor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tasks: JoinSet::new(),
            tx,
            rx,
        }
    }

    /// Spent-check `proofs` after `delay`.
    pub fn schedule_verification(
        &mut self,
        mint: Arc<dyn MintClient>,
        proofs: Vec<Proof>,
        delay: Duration,
    ) {
        if proofs.is_empty() {
            return;
        }
        self.reap();

        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            let event = match mint.check_proofs_spent(&proofs).await {
                Ok(spent) if spent.is_empty() => {
                    debug!(checked = proofs.len(), "background verification clean");
                    return;
                }
                Ok(spent) => {
                    warn!(spent = spent.len(), "background verification found spent proofs");
                    MonitorEvent::SpentDetected {
                        secrets: spent.into_iter().map(|p| p.secret).collect(),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "background verification failed");
                    MonitorEvent::VerificationFailed {
                        reason: e.to_string(),
                    }
                }
            };
            let _ = tx.send(event);
        });
    }

    /// Events reported since the last drain.
    pub fn drain(&mut self) -> Vec<MonitorEvent> {
        self.reap();
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for all scheduled checks to finish.
    pub async fn wait_idle(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Number of checks still running.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown(&mut self) {
        self.tasks.abort_all();
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!(error = %e, "background verification task panicked");
                }
            }
        }
    }
}

impl Drop for BackgroundMonitor {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}
