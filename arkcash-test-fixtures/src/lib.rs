//! Shared test doubles for the ledger and bridge crates.
//!
//! [`MockMint`] and [`MockCustodial`] settle payments through one
//! [`MockLightning`], so a full encrypt/decrypt round trip runs in-process.

pub mod custodial;
pub mod lightning;
pub mod mint;
pub mod store;

use std::sync::Arc;

use anyhow::{ensure, Context, Result};

use arkcash_ledger::{KvStore, LedgerConfig, MemoryStore, MintClient, ProofLedger};

pub use custodial::MockCustodial;
pub use lightning::MockLightning;
pub use mint::{amounts_for_target, MockMint, MOCK_KEYSET_ID, MOCK_MINT_URL};
pub use store::FailingStore;

/// Ledger configuration pointed at [`MOCK_MINT_URL`], background checks off.
pub fn ledger_config(wallet_id: &str) -> LedgerConfig {
    let mut config = LedgerConfig::new(wallet_id, MOCK_MINT_URL);
    config.background_verify = false;
    config
}

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("arkcash_ledger=debug,arkcash_bridge=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Everything a ledger test needs, wired to a fresh in-memory store.
pub struct LedgerHarness {
    pub lightning: Arc<MockLightning>,
    pub mint: Arc<MockMint>,
    pub store: Arc<MemoryStore>,
    pub ledger: ProofLedger,
}

impl LedgerHarness {
    pub fn new(config: LedgerConfig) -> Result<Self> {
        let lightning = MockLightning::new();
        let mint = MockMint::new(Arc::clone(&lightning));
        let store = Arc::new(MemoryStore::new());
        let ledger = open_ledger(config, &mint, Arc::clone(&store) as Arc<dyn KvStore>)?;
        Ok(Self {
            lightning,
            mint,
            store,
            ledger,
        })
    }

    /// Reopen the ledger over the same store, as after a restart.
    pub fn reopen(&mut self) -> Result<()> {
        let config = self.ledger.config().clone();
        self.ledger.shutdown();
        self.ledger = open_ledger(
            config,
            &self.mint,
            Arc::clone(&self.store) as Arc<dyn KvStore>,
        )?;
        Ok(())
    }

    /// Request, pay and mint `amount`. Returns the quote id.
    pub async fn fund(&mut self, amount: u64) -> Result<String> {
        fund_ledger(&mut self.ledger, &self.mint, amount).await
    }
}

pub fn open_ledger(
    config: LedgerConfig,
    mint: &Arc<MockMint>,
    store: Arc<dyn KvStore>,
) -> Result<ProofLedger> {
    let client: Arc<dyn MintClient> = Arc::clone(mint) as Arc<dyn MintClient>;
    ProofLedger::open(config, client, store).context("open ledger")
}

/// Mint `amount` into `ledger` through an externally paid quote.
pub async fn fund_ledger(ledger: &mut ProofLedger, mint: &MockMint, amount: u64) -> Result<String> {
    let quote = ledger.request_mint(amount).await.context("request mint")?;
    mint.pay_quote(&quote.quote);
    let outcome = ledger
        .mint(amount, &quote.quote)
        .await
        .context("mint funded quote")?;
    ensure!(
        outcome.amount() == amount,
        "minted {} instead of {amount}",
        outcome.amount()
    );
    Ok(quote.quote)
}
