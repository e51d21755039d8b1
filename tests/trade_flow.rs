//! End-to-end protocol tests: two engines (maker and taker) wired through
//! an in-memory message pump, with deterministic test wallets on both
//! sides.

mod test_framework;

use std::sync::Arc;

use bitcoin::{absolute::LockTime, Amount};
use escrowtrade::{
    config::EngineConfig,
    engine::{EngineError, TradeEngine},
    offer::{Offer, OfferDirection},
    payment::PaymentMethodRegistry,
    protocol::messages::TradeMessage,
    trade::{store::TradeStore, TradeState},
};
use test_framework::{temp_store_path, TestWallet};

const TRADE_AMOUNT: u64 = 100_000_000;
const DEPOSIT: u64 = 10_000_000;
const CONFIRM_TIME: u64 = 1_700_000_000;

fn sell_offer(id: &str) -> Offer {
    Offer {
        id: id.to_string(),
        direction: OfferDirection::Sell,
        amount: Amount::from_sat(TRADE_AMOUNT),
        price: 60_000,
        buyer_security_deposit: Amount::from_sat(DEPOSIT),
        seller_security_deposit: Amount::from_sat(DEPOSIT),
        payment_method_id: "SEPA".to_string(),
    }
}

struct Party {
    wallet: Arc<TestWallet>,
    engine: TradeEngine,
}

fn make_party(store_name: &str, seed: u8, utxos: &[u64]) -> Party {
    let wallet = Arc::new(TestWallet::new(seed, utxos));
    let store = TradeStore::init(&temp_store_path(store_name), None).unwrap();
    let engine = TradeEngine::new(
        wallet.clone(),
        PaymentMethodRegistry::builtin(),
        EngineConfig::default(),
        store,
        None,
    )
    .unwrap();
    Party { wallet, engine }
}

/// Maker funds the seller share (trade amount + deposit), taker the buyer
/// share (deposit only).
fn maker_taker(test: &str) -> (Party, Party) {
    let maker = make_party(&format!("{test}-maker"), 3, &[60_000_000, 60_000_000]);
    let taker = make_party(&format!("{test}-taker"), 7, &[15_000_000]);
    (maker, taker)
}

/// Shuttles messages between the two engines until both go quiet.
fn pump(maker: &TradeEngine, taker: &TradeEngine, from_taker: Vec<TradeMessage>) {
    let mut to_maker = from_taker;
    let mut to_taker: Vec<TradeMessage> = Vec::new();
    for _ in 0..20 {
        if to_maker.is_empty() && to_taker.is_empty() {
            return;
        }
        for msg in std::mem::take(&mut to_maker) {
            to_taker.extend(maker.handle_message(msg).unwrap());
        }
        for msg in std::mem::take(&mut to_taker) {
            to_maker.extend(taker.handle_message(msg).unwrap());
        }
    }
    panic!("message pump did not converge");
}

/// Drives a fresh trade up to `DepositTxPublished` on both sides and
/// returns the trade id.
fn drive_to_published(maker: &Party, taker: &Party) -> String {
    let offer = sell_offer("offer-flow");
    maker.engine.add_offer(offer.clone()).unwrap();
    let opening = taker.engine.take_offer(offer.clone()).unwrap();
    pump(&maker.engine, &taker.engine, opening);

    assert_eq!(
        maker.engine.trade_state(&offer.id),
        Some(TradeState::DepositTxPublished)
    );
    assert_eq!(
        taker.engine.trade_state(&offer.id),
        Some(TradeState::DepositTxPublished)
    );
    offer.id
}

/// Continues a published trade through confirmation and the delayed payout
/// co-signing round.
fn drive_to_confirmed(maker: &Party, taker: &Party, trade_id: &str) {
    let deposit_txid = maker
        .engine
        .trade_record(trade_id)
        .unwrap()
        .trade
        .deposit_txid
        .unwrap();
    taker.wallet.set_confirmations(deposit_txid, 1);

    assert!(taker
        .engine
        .deposit_confirmed(trade_id, CONFIRM_TIME)
        .unwrap()
        .is_empty());
    let request = maker
        .engine
        .deposit_confirmed(trade_id, CONFIRM_TIME)
        .unwrap();
    assert_eq!(request.len(), 1);
    let response = taker.engine.handle_message(request[0].clone()).unwrap();
    assert_eq!(response.len(), 1);
    assert!(maker
        .engine
        .handle_message(response[0].clone())
        .unwrap()
        .is_empty());

    assert_eq!(
        maker.engine.trade_state(trade_id),
        Some(TradeState::DepositTxConfirmed)
    );
    assert_eq!(
        taker.engine.trade_state(trade_id),
        Some(TradeState::DepositTxConfirmed)
    );
}

#[test]
fn standard_trade_completes_with_exact_escrow_and_payout_split() {
    let (maker, taker) = maker_taker("standard");
    let trade_id = drive_to_published(&maker, &taker);

    // Exactly one broadcast so far: the deposit. Its escrow output carries
    // trade amount + both security deposits, to the sat.
    let broadcasts = maker.wallet.broadcast_txs();
    assert_eq!(broadcasts.len(), 1);
    let deposit_tx = &broadcasts[0];
    let escrow_value = Amount::from_sat(TRADE_AMOUNT + 2 * DEPOSIT);
    assert!(deposit_tx.output.iter().any(|out| out.value == escrow_value));

    drive_to_confirmed(&maker, &taker, &trade_id);

    // Both sides hold the fully signed delayed payout, locked strictly
    // later than the confirmation time.
    for party in [&maker, &taker] {
        let record = party.engine.trade_record(&trade_id).unwrap();
        let delayed = record.model.delayed_payout_tx.unwrap();
        assert!(!delayed.input[0].witness.is_empty());
        match delayed.lock_time {
            LockTime::Seconds(time) => {
                assert!(u64::from(time.to_consensus_u32()) > CONFIRM_TIME)
            }
            LockTime::Blocks(_) => panic!("delayed payout must be time locked"),
        }
    }

    // Taker bought: taker confirms payment sent, maker confirms receipt.
    let sent = taker.engine.confirm_payment_sent(&trade_id).unwrap();
    assert_eq!(sent.len(), 1);
    assert!(maker.engine.handle_message(sent[0].clone()).unwrap().is_empty());
    assert_eq!(
        maker.engine.trade_state(&trade_id),
        Some(TradeState::PaymentSent)
    );

    let received = maker.engine.confirm_payment_received(&trade_id).unwrap();
    assert_eq!(received.len(), 1);
    let published = taker.engine.handle_message(received[0].clone()).unwrap();
    assert_eq!(published.len(), 1);
    assert!(maker
        .engine
        .handle_message(published[0].clone())
        .unwrap()
        .is_empty());

    assert_eq!(
        maker.engine.trade_state(&trade_id),
        Some(TradeState::PayoutPublished)
    );
    assert_eq!(
        taker.engine.trade_state(&trade_id),
        Some(TradeState::PayoutPublished)
    );

    // The buyer (taker) broadcast the payout: trade amount + buyer deposit
    // to the buyer, seller deposit back to the seller, fee split evenly.
    let payouts = taker.wallet.broadcast_txs();
    assert_eq!(payouts.len(), 1);
    let payout = &payouts[0];
    let fee = EngineConfig::default().payout_tx_fee;
    assert_eq!(
        payout.output[0].value,
        Amount::from_sat(TRADE_AMOUNT + DEPOSIT - (fee - fee / 2))
    );
    assert_eq!(
        payout.output[1].value,
        Amount::from_sat(DEPOSIT - fee / 2)
    );

    // Reservations are gone on both sides; archiving clears the record.
    assert!(!maker.wallet.has_reservation(&trade_id));
    assert!(!taker.wallet.has_reservation(&trade_id));
    maker.engine.archive_trade(&trade_id).unwrap();
    assert_eq!(maker.engine.trade_state(&trade_id), None);
}

#[test]
fn restarted_maker_reuses_the_prepared_deposit_tx() {
    let maker_store = temp_store_path("restart-maker");
    let maker_wallet = Arc::new(TestWallet::new(3, &[60_000_000, 60_000_000]));
    let maker_engine = TradeEngine::new(
        maker_wallet.clone(),
        PaymentMethodRegistry::builtin(),
        EngineConfig::default(),
        TradeStore::init(&maker_store, None).unwrap(),
        None,
    )
    .unwrap();
    let taker = make_party("restart-taker", 7, &[15_000_000]);

    let offer = sell_offer("offer-restart");
    maker_engine.add_offer(offer.clone()).unwrap();

    // Walk the handshake manually up to the maker's deposit construction.
    let availability_request = taker.engine.take_offer(offer.clone()).unwrap();
    let availability_response = maker_engine
        .handle_message(availability_request[0].clone())
        .unwrap();
    let deposit_request = taker
        .engine
        .handle_message(availability_response[0].clone())
        .unwrap();
    let first_response = maker_engine
        .handle_message(deposit_request[0].clone())
        .unwrap();

    // Simulated crash: a new engine over the same store and wallet.
    drop(maker_engine);
    let resumed = TradeEngine::new(
        maker_wallet.clone(),
        PaymentMethodRegistry::builtin(),
        EngineConfig::default(),
        TradeStore::init(&maker_store, None).unwrap(),
        None,
    )
    .unwrap();
    assert_eq!(
        resumed.trade_state(&offer.id),
        Some(TradeState::AvailabilityChecked)
    );

    // Re-dispatching the same request must not construct a second,
    // different deposit transaction.
    let second_response = resumed.handle_message(deposit_request[0].clone()).unwrap();
    let (TradeMessage::DepositTxResponse(first), TradeMessage::DepositTxResponse(second)) =
        (&first_response[0], &second_response[0])
    else {
        panic!("expected deposit tx responses");
    };
    assert_eq!(first.deposit_tx, second.deposit_tx);

    // The trade still completes through the resumed engine.
    let signature = taker
        .engine
        .handle_message(second_response[0].clone())
        .unwrap();
    let published = resumed.handle_message(signature[0].clone()).unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(maker_wallet.broadcast_txs().len(), 1);
    assert_eq!(
        resumed.trade_state(&offer.id),
        Some(TradeState::DepositTxPublished)
    );
}

#[test]
fn duplicate_deposit_tx_response_is_dropped_after_confirmation() {
    let (maker, taker) = maker_taker("duplicate");
    let offer = sell_offer("offer-flow");

    // Capture the deposit response on its way through the handshake.
    maker.engine.add_offer(offer.clone()).unwrap();
    let availability_request = taker.engine.take_offer(offer.clone()).unwrap();
    let availability_response = maker
        .engine
        .handle_message(availability_request[0].clone())
        .unwrap();
    let deposit_request = taker
        .engine
        .handle_message(availability_response[0].clone())
        .unwrap();
    let deposit_response = maker
        .engine
        .handle_message(deposit_request[0].clone())
        .unwrap();
    let signature = taker
        .engine
        .handle_message(deposit_response[0].clone())
        .unwrap();
    pump(&maker.engine, &taker.engine, signature);
    drive_to_confirmed(&maker, &taker, &offer.id);

    // The replay: same DepositTxResponse, long after it was consumed.
    let replayed = taker
        .engine
        .handle_message(deposit_response[0].clone())
        .unwrap();
    assert!(replayed.is_empty());
    assert_eq!(
        taker.engine.trade_state(&offer.id),
        Some(TradeState::DepositTxConfirmed)
    );
}

#[test]
fn non_conforming_taker_input_fails_before_any_signature() {
    let (maker, taker) = maker_taker("badinput");
    taker.wallet.make_utxo_legacy(0);

    let offer = sell_offer("offer-bad-input");
    maker.engine.add_offer(offer.clone()).unwrap();
    let availability_request = taker.engine.take_offer(offer.clone()).unwrap();
    let availability_response = maker
        .engine
        .handle_message(availability_request[0].clone())
        .unwrap();
    let deposit_request = taker
        .engine
        .handle_message(availability_response[0].clone())
        .unwrap();

    // Maker refuses the construction outright.
    let result = maker.engine.handle_message(deposit_request[0].clone());
    assert!(matches!(result, Err(EngineError::Task(_))));

    let record = maker.engine.trade_record(&offer.id).unwrap();
    assert_eq!(record.trade.state, TradeState::Failed);
    assert!(record
        .trade
        .error_message
        .as_ref()
        .unwrap()
        .contains("UnsupportedSpendType"));
    // No deposit transaction was built, so nothing was ever signed.
    assert!(record.model.prepared_deposit_tx.is_none());
    assert!(record.model.deposit_tx.is_none());
    // The taker never got past the availability handshake.
    assert_eq!(
        taker.engine.trade_state(&offer.id),
        Some(TradeState::AvailabilityChecked)
    );
}

#[test]
fn dispute_hands_over_payload_and_applies_resolution() {
    let (maker, taker) = maker_taker("dispute");
    let trade_id = drive_to_published(&maker, &taker);
    drive_to_confirmed(&maker, &taker, &trade_id);

    let payload = maker
        .engine
        .open_dispute(&trade_id, vec!["payment never arrived".to_string()])
        .unwrap();
    assert_eq!(
        maker.engine.trade_state(&trade_id),
        Some(TradeState::DisputeOpened)
    );
    assert_eq!(payload.evidence.len(), 1);
    assert!(payload.contract_json.contains(&trade_id));
    let release = payload
        .delayed_payout_tx
        .expect("payload carries the co-signed delayed payout");
    assert!(!release.input[0].witness.is_empty());

    // The mediator hands back a signed release; here the delayed payout
    // itself serves as one.
    maker
        .engine
        .apply_dispute_resolution(escrowtrade::trade::dispute::DisputeResolution {
            trade_id: trade_id.clone(),
            signed_payout_tx: release.clone(),
        })
        .unwrap();
    assert_eq!(
        maker.engine.trade_state(&trade_id),
        Some(TradeState::DisputeClosed)
    );
    assert!(maker
        .wallet
        .broadcast_txs()
        .iter()
        .any(|tx| tx.compute_txid() == release.compute_txid()));
    assert!(!maker.wallet.has_reservation(&trade_id));
}
