//! Integration tests for arkcash-bridge.
//!
//! The mock mint and custodial wallet share one in-process Lightning network,
//! so encrypt and decrypt move real (mock) sats in both directions. Tests run
//! on a paused clock; settle delays and poll intervals elapse instantly.

use std::sync::Arc;

use arkcash_bridge::{
    BoardingBalance, BridgeConfig, BridgeError, BridgeEvent, CustodialError, CustodialWallet,
    ExitOutput, SagaDirection, SagaStep, SwapBridge,
};
use arkcash_ledger::{LedgerError, MemoryStore};
use arkcash_test_fixtures::{
    init_tracing, ledger_config, open_ledger, MockCustodial, MockLightning, MockMint,
};

const EXIT_ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
const ARK_ADDRESS: &str = "tark1qz9fhwclk24f9w240hgt8x597vwjqn6ckswx96qh0ckvpxz2dnrw";

// === Test Fixtures ===

struct Setup {
    mint: Arc<MockMint>,
    custodial: Arc<MockCustodial>,
    bridge: SwapBridge,
}

fn setup(custodial_funds: u64) -> Setup {
    init_tracing();
    let lightning = MockLightning::new();
    let mint = MockMint::new(Arc::clone(&lightning));
    let custodial = MockCustodial::with_balance(lightning, custodial_funds);
    let ledger = open_ledger(ledger_config("bridge"), &mint, Arc::new(MemoryStore::new()))
        .expect("open ledger");
    let bridge = SwapBridge::new(
        BridgeConfig::default(),
        ledger,
        Arc::clone(&custodial) as Arc<dyn CustodialWallet>,
    );
    Setup {
        mint,
        custodial,
        bridge,
    }
}

// === Encrypt ===

#[tokio::test(start_paused = true)]
async fn test_encrypt_moves_custodial_funds_into_ecash() {
    let mut s = setup(5_000);
    let mut saga_rx = s.bridge.subscribe_saga();

    let receipt = s.bridge.encrypt(1_000).await.unwrap();

    assert_eq!(receipt.amount, 1_000);
    assert_eq!(receipt.fee_buffer, 50);
    assert_eq!(receipt.recovery, None);
    assert_eq!(s.bridge.ledger().balance(), 1_000);
    assert_eq!(s.custodial.balance(), 4_000);
    assert_eq!(s.bridge.custodial_balance(), 4_000);
    assert_eq!(s.custodial.payments().len(), 1);

    let saga = saga_rx.borrow_and_update().clone().expect("saga");
    assert_eq!(saga.id, receipt.saga_id);
    assert_eq!(saga.direction, SagaDirection::Encrypt);
    assert_eq!(saga.step, SagaStep::Complete);
    assert_eq!(saga.quote_id.as_deref(), Some(receipt.quote_id.as_str()));

    s.bridge.wait_idle().await;
    assert!(s.bridge.saga().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_encrypt_small_amount_uses_minimum_fee_buffer() {
    let mut s = setup(5_000);
    let receipt = s.bridge.encrypt(100).await.unwrap();
    assert_eq!(receipt.fee_buffer, 10);
}

#[tokio::test(start_paused = true)]
async fn test_encrypt_requires_amount_plus_fee_buffer() {
    let mut s = setup(1_000);

    let err = s.bridge.encrypt(1_000).await.unwrap_err();

    match err {
        BridgeError::InsufficientCustodialBalance { required, available } => {
            assert_eq!((required, available), (1_050, 1_000));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(s.custodial.payments().is_empty());
    assert_eq!(s.custodial.balance(), 1_000);

    let saga = s.bridge.saga().expect("failed saga stays visible");
    assert_eq!(saga.step, SagaStep::Error);
    assert!(saga.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_encrypt_rejects_zero_amount() {
    let mut s = setup(1_000);
    assert!(matches!(
        s.bridge.encrypt(0).await,
        Err(BridgeError::InvalidAmount(0))
    ));
    assert!(s.bridge.saga().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_encrypt_times_out_when_mint_never_confirms() {
    let mut s = setup(5_000);
    s.mint.confirm_after(u32::MAX);

    let err = s.bridge.encrypt(1_000).await.unwrap_err();

    let quote_id = match err {
        BridgeError::PaymentConfirmationTimeout { quote_id, attempts } => {
            assert_eq!(attempts, 20);
            quote_id
        }
        other => panic!("unexpected error: {other:?}"),
    };
    assert_eq!(s.bridge.ledger().balance(), 0);
    assert_eq!(s.custodial.balance(), 4_000);

    // The paid quote can still be minted by hand.
    let outcome = s.bridge.ledger_mut().mint(1_000, &quote_id).await.unwrap();
    assert_eq!(outcome.amount(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_encrypt_waits_through_slow_confirmation() {
    let mut s = setup(5_000);
    s.mint.confirm_after(3);

    let receipt = s.bridge.encrypt(500).await.unwrap();

    assert_eq!(receipt.amount, 500);
    assert_eq!(s.bridge.ledger().balance(), 500);
}

#[tokio::test(start_paused = true)]
async fn test_stale_saga_clear_keeps_newer_saga() {
    let mut s = setup(5_000);

    let first = s.bridge.encrypt(100).await.unwrap();
    let second = s.bridge.encrypt(200).await.unwrap();
    assert_ne!(first.saga_id, second.saga_id);

    let saga = s.bridge.saga().expect("second saga");
    assert_eq!(saga.id, second.saga_id);
    assert_eq!(saga.step, SagaStep::Complete);

    s.bridge.wait_idle().await;
    assert!(s.bridge.saga().is_none());
}

// === Decrypt ===

#[tokio::test(start_paused = true)]
async fn test_decrypt_melts_ecash_into_custodial_wallet() {
    let mut s = setup(5_000);
    s.bridge.encrypt(1_000).await.unwrap();

    let receipt = s.bridge.decrypt(300).await.unwrap();

    assert_eq!(receipt.amount, 300);
    assert_eq!(receipt.fee_paid, 0);
    assert!(receipt.preimage.is_some());
    assert_eq!(s.bridge.ledger().balance(), 700);

    s.bridge.wait_idle().await;
    let events = s.bridge.process_events().await.unwrap();
    assert!(matches!(
        events.as_slice(),
        [BridgeEvent::InvoiceClaimed { amount: 300, .. }]
    ));
    assert_eq!(s.custodial.balance(), 4_300);
    assert_eq!(s.bridge.custodial_balance(), 4_300);
}

#[tokio::test(start_paused = true)]
async fn test_decrypt_checks_ledger_balance_first() {
    let mut s = setup(5_000);

    let err = s.bridge.decrypt(300).await.unwrap_err();

    assert!(matches!(
        err,
        BridgeError::Ledger(LedgerError::InsufficientBalance {
            required: 300,
            available: 0
        })
    ));
    assert!(s.bridge.saga().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_decrypt_keeps_ecash_and_reports_unclaimed_swap() {
    let mut s = setup(5_000);
    s.bridge.encrypt(1_000).await.unwrap();
    s.mint.set_fail_melt(true);

    let err = s.bridge.decrypt(300).await.unwrap_err();

    assert!(matches!(err, BridgeError::Ledger(LedgerError::MintRejected(_))));
    assert_eq!(s.bridge.ledger().balance(), 1_000);
    assert_eq!(s.bridge.saga().map(|saga| saga.step), Some(SagaStep::Error));

    s.bridge.wait_idle().await;
    let events = s.bridge.process_events().await.unwrap();
    assert!(matches!(events.as_slice(), [BridgeEvent::ClaimFailed { .. }]));
    assert_eq!(s.custodial.balance(), 4_000);
}

// === Exit ===

#[tokio::test(start_paused = true)]
async fn test_exit_settles_vtxos_on_chain() {
    let mut s = setup(5_000);

    let txid = s.bridge.exit_to_onchain(EXIT_ADDRESS, 1_200).await.unwrap();

    assert_eq!(txid.len(), 64);
    assert_eq!(s.custodial.balance(), 3_800);
    assert_eq!(s.bridge.custodial_balance(), 3_800);
    let settlements = s.custodial.settlements();
    assert_eq!(settlements.len(), 1);
    assert_eq!(
        settlements[0].outputs,
        vec![ExitOutput {
            address: EXIT_ADDRESS.to_string(),
            amount: 1_200
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exit_rejects_short_address() {
    let mut s = setup(5_000);
    let err = s.bridge.exit_to_onchain("bc1qshort", 1_000).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidAddress(_)));
    assert!(s.custodial.settlements().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exit_needs_enough_vtxos() {
    let mut s = setup(5_000);
    s.custodial.fund(1_000);

    let err = s.bridge.exit_to_onchain(EXIT_ADDRESS, 10_000).await.unwrap_err();

    assert!(matches!(
        err,
        BridgeError::InsufficientVtxos {
            required: 10_000,
            available: 6_000
        }
    ));
    assert_eq!(s.custodial.balance(), 6_000);
}

// === Ark Payments and Onboarding ===

#[tokio::test(start_paused = true)]
async fn test_send_to_ark_address_debits_custodial_wallet() {
    let mut s = setup(5_000);

    let txid = s.bridge.send_to_ark_address(ARK_ADDRESS, 1_200).await.unwrap();

    assert_eq!(txid.len(), 64);
    assert_eq!(s.custodial.balance(), 3_800);
    assert_eq!(s.bridge.custodial_balance(), 3_800);
    assert_eq!(s.custodial.transfers(), vec![(ARK_ADDRESS.to_string(), 1_200)]);
}

#[tokio::test(start_paused = true)]
async fn test_send_to_ark_address_checks_balance_and_address() {
    let mut s = setup(500);

    let err = s.bridge.send_to_ark_address(ARK_ADDRESS, 1_000).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InsufficientCustodialBalance {
            required: 1_000,
            available: 500
        }
    ));

    let err = s.bridge.send_to_ark_address("tark1short", 100).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidAddress(_)));
    assert!(s.custodial.transfers().is_empty());
    assert_eq!(s.custodial.balance(), 500);
}

#[tokio::test(start_paused = true)]
async fn test_onboard_turns_boarding_into_vtxos() {
    let mut s = setup(1_000);
    s.custodial.set_boarding(BoardingBalance {
        confirmed: 2_000,
        unconfirmed: 0,
        total: 2_000,
    });

    let txid = s.bridge.onboard_boarding_utxos().await.unwrap();

    assert_eq!(txid.len(), 64);
    assert_eq!(s.custodial.balance(), 3_000);
    assert_eq!(s.bridge.custodial_balance(), 3_000);

    let err = s.bridge.onboard_boarding_utxos().await.unwrap_err();
    assert!(matches!(err, BridgeError::Custodial(CustodialError::Rejected(_))));
}
