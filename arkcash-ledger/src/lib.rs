//! arkcash-ledger
//!
//! Crash-consistent ecash proof ledger for a single Cashu-style mint.
//!
//! # Core Invariants
//!
//! 1. **Balance is derived** - always the sum of held proof values
//! 2. **Secrets are unique** - no two held proofs share a secret
//! 3. **Counter is monotonic** - never decreases, except by an explicit reset
//! 4. **Write-through** - every mutation is persisted before the operation returns
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ProofLedger                          │
//! │                                                              │
//! │  mint / send / receive / melt / restore / reconcile / reset  │
//! │        │                  │                      ▲           │
//! │        ▼                  ▼                      │           │
//! │  ┌────────────┐   ┌───────────────┐   ┌──────────────────┐   │
//! │  │ Recovery   │   │ LedgerStorage │   │ BackgroundMonitor│   │
//! │  │ skip-ahead │   │ counter       │   │ delayed spent-   │   │
//! │  │ targeted   │   │ proofs        │   │ checks, reports  │   │
//! │  │ wide scan  │   │ quote/token   │   │ over mpsc        │   │
//! │  └─────┬──────┘   │ logs          │   └────────┬─────────┘   │
//! │        │          └───────┬───────┘            │             │
//! └────────┼──────────────────┼────────────────────┼─────────────┘
//!          ▼                  ▼                    ▼
//!     MintClient           KvStore             MintClient
//! ```

pub mod bounded;
pub mod config;
pub mod error;
pub mod ledger;
pub mod mint;
pub mod monitor;
pub mod persist;
pub mod store;
pub mod token;
pub mod types;

pub use config::{LedgerConfig, RecoveryConfig};
pub use error::{LedgerError, LedgerResult};
pub use ledger::ProofLedger;
pub use mint::{MintClient, MintClientError};
pub use monitor::{BackgroundMonitor, MonitorEvent};
pub use persist::LedgerStorage;
pub use store::{KvStore, MemoryStore, NamespacedStore, StoreError};
pub use token::{Token, TokenError, TOKEN_PREFIX};
pub use types::*;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
