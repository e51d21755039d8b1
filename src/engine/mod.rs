//! The Trade Engine.
//!
//! Owns every live trade in an arena keyed by trade id, with one run-lock
//! per trade: chains for the same trade execute strictly one at a time,
//! chains for different trades run concurrently. Every inbound event (a
//! peer message, a wallet confirmation, a user action) goes through the
//! state machine table; anything the trade's current state does not expect
//! is logged and dropped. Legal events run their task chain through the
//! [`TaskRunner`], and whatever messages the chain produced are handed back
//! to the caller for transport.

mod error;

pub use error::EngineError;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use bitcoin::PublicKey;

use crate::{
    config::EngineConfig,
    offer::Offer,
    payment::PaymentMethodRegistry,
    protocol::messages::TradeMessage,
    trade::{
        dispute::{self, DisputePayload, DisputeResolution},
        fsm::{self, TradeEvent},
        runner::TaskRunner,
        store::{TradeRecord, TradeStore},
        tasks::TradeContext,
        process_model::ProcessModel,
        Trade, TradeRole, TradeState,
    },
    wallet::WalletApi,
};

/// Drives all of this party's trades through the protocol.
pub struct TradeEngine {
    wallet: Arc<dyn WalletApi>,
    methods: PaymentMethodRegistry,
    config: EngineConfig,
    store: TradeStore,
    arbitrator: Option<PublicKey>,
    trades: RwLock<HashMap<String, Arc<Mutex<TradeRecord>>>>,
    offers: RwLock<HashMap<String, Offer>>,
}

impl TradeEngine {
    /// Creates an engine over the given service boundaries, resuming every
    /// trade checkpointed in the store.
    pub fn new(
        wallet: Arc<dyn WalletApi>,
        methods: PaymentMethodRegistry,
        config: EngineConfig,
        store: TradeStore,
        arbitrator: Option<PublicKey>,
    ) -> Result<Self, EngineError> {
        let mut trades = HashMap::new();
        for (id, record) in store.load_all()? {
            log::info!("Resuming trade {} in state {}", id, record.trade.state);
            trades.insert(id, Arc::new(Mutex::new(record)));
        }
        Ok(Self {
            wallet,
            methods,
            config,
            store,
            arbitrator,
            trades: RwLock::new(trades),
            offers: RwLock::new(HashMap::new()),
        })
    }

    /// Registers one of this party's own open offers, so availability
    /// requests against it can be answered.
    pub fn add_offer(&self, offer: Offer) -> Result<(), EngineError> {
        offer.validate(&self.methods)?;
        self.offers.write()?.insert(offer.id.clone(), offer);
        Ok(())
    }

    /// Withdraws one of this party's open offers.
    pub fn remove_offer(&self, offer_id: &str) -> Result<(), EngineError> {
        self.offers.write()?.remove(offer_id);
        Ok(())
    }

    /// Takes a counterparty's offer: creates the taker-side trade and
    /// returns the opening message(s) for the transport.
    pub fn take_offer(&self, offer: Offer) -> Result<Vec<TradeMessage>, EngineError> {
        let role = TradeRole::taker_from_offer(&offer);
        let trade_id = offer.id.clone();
        self.create_trade(Trade::new(offer, role))?;
        self.dispatch(&trade_id, TradeEvent::TakeOffer)
    }

    /// Feeds one decoded peer message into the owning trade.
    ///
    /// An availability request against one of this party's open offers
    /// creates the maker-side trade; the offer leaves the open book at
    /// that moment. Messages for unknown trades are logged and dropped.
    pub fn handle_message(&self, message: TradeMessage) -> Result<Vec<TradeMessage>, EngineError> {
        let trade_id = message.trade_id().to_string();
        let known = self.trades.read()?.contains_key(&trade_id);
        if !known {
            if let TradeMessage::AvailabilityRequest(_) = &message {
                let offer = self.offers.write()?.remove(&trade_id);
                match offer {
                    Some(offer) => {
                        let role = TradeRole::maker_from_offer(&offer);
                        self.create_trade(Trade::new(offer, role))?;
                    }
                    None => {
                        log::warn!("[{trade_id}] Availability request for unknown offer, dropped");
                        return Ok(Vec::new());
                    }
                }
            } else {
                log::warn!("[{trade_id}] {message} for unknown trade, dropped");
                return Ok(Vec::new());
            }
        }
        self.dispatch(&trade_id, TradeEvent::Message(message))
    }

    /// Reports the escrow reaching the wallet's required depth.
    pub fn deposit_confirmed(
        &self,
        trade_id: &str,
        time: u64,
    ) -> Result<Vec<TradeMessage>, EngineError> {
        self.dispatch(trade_id, TradeEvent::DepositConfirmed { time })
    }

    /// User action: the buyer initiated the payment leg.
    pub fn confirm_payment_sent(&self, trade_id: &str) -> Result<Vec<TradeMessage>, EngineError> {
        self.dispatch(trade_id, TradeEvent::PaymentSent)
    }

    /// User action: the seller received the payment.
    pub fn confirm_payment_received(
        &self,
        trade_id: &str,
    ) -> Result<Vec<TradeMessage>, EngineError> {
        self.dispatch(trade_id, TradeEvent::PaymentReceived)
    }

    /// Escalates a trade to the mediator and returns the payload to hand
    /// over. The trade moves to `DisputeOpened`.
    pub fn open_dispute(
        &self,
        trade_id: &str,
        evidence: Vec<String>,
    ) -> Result<DisputePayload, EngineError> {
        self.dispatch(trade_id, TradeEvent::OpenDispute { evidence })?;
        let slot = self.trade_slot(trade_id)?;
        let record = slot.lock()?;
        Ok(dispute::build_payload(&record.trade, &record.model)?)
    }

    /// Applies the mediator's signed release: verifies it spends the
    /// trade's escrow, broadcasts it and closes the dispute.
    pub fn apply_dispute_resolution(
        &self,
        resolution: DisputeResolution,
    ) -> Result<Vec<TradeMessage>, EngineError> {
        let trade_id = resolution.trade_id.clone();
        self.dispatch(&trade_id, TradeEvent::DisputeResolved(resolution))
    }

    /// Current state of a trade, if it exists.
    pub fn trade_state(&self, trade_id: &str) -> Option<TradeState> {
        let slot = self.trade_slot(trade_id).ok()?;
        let record = slot.lock().ok()?;
        Some(record.trade.state)
    }

    /// Snapshot of a trade's checkpointed record.
    pub fn trade_record(&self, trade_id: &str) -> Option<TradeRecord> {
        let slot = self.trade_slot(trade_id).ok()?;
        let record = slot.lock().ok()?;
        Some(record.clone())
    }

    /// Ids of all live trades.
    pub fn list_trades(&self) -> Vec<String> {
        self.trades
            .read()
            .map(|trades| trades.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops a finished trade from the arena and the store.
    pub fn archive_trade(&self, trade_id: &str) -> Result<(), EngineError> {
        let removed = self.trades.write()?.remove(trade_id);
        if removed.is_none() {
            return Err(EngineError::UnknownTrade(trade_id.to_string()));
        }
        self.store.remove(trade_id)?;
        log::info!("[{trade_id}] Trade archived");
        Ok(())
    }

    fn create_trade(&self, trade: Trade) -> Result<(), EngineError> {
        let mut trades = self.trades.write()?;
        if trades.contains_key(&trade.id) {
            return Err(EngineError::DuplicateTrade(trade.id));
        }
        let id = trade.id.clone();
        trades.insert(
            id,
            Arc::new(Mutex::new(TradeRecord {
                trade,
                model: ProcessModel::default(),
            })),
        );
        Ok(())
    }

    fn trade_slot(&self, trade_id: &str) -> Result<Arc<Mutex<TradeRecord>>, EngineError> {
        self.trades
            .read()?
            .get(trade_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTrade(trade_id.to_string()))
    }

    /// Runs the state machine for one event under the trade's run lock.
    fn dispatch(
        &self,
        trade_id: &str,
        event: TradeEvent,
    ) -> Result<Vec<TradeMessage>, EngineError> {
        let slot = self.trade_slot(trade_id)?;
        // The guard is the per-trade run ticket: no two chains for the same
        // trade can ever interleave.
        let mut record = slot.lock()?;

        let transition = match fsm::transition(record.trade.role, record.trade.state, &event) {
            Some(transition) => transition,
            None => {
                log::warn!(
                    "[{}] Dropped {} in state {}",
                    trade_id,
                    event,
                    record.trade.state
                );
                return Ok(Vec::new());
            }
        };

        let TradeRecord { trade, model } = &mut *record;
        let mut ctx = TradeContext {
            trade,
            model,
            wallet: self.wallet.as_ref(),
            methods: &self.methods,
            config: &self.config,
            arbitrator: self.arbitrator,
            event: &event,
        };
        let runner = TaskRunner::new(&self.store);
        let outcome = runner.run_chain(transition.chain, &mut ctx)?;

        if !outcome.halted {
            if let Some(next) = transition.next {
                record.trade.advance_state(next);
            }
            self.store.checkpoint(&record.trade, &record.model)?;
        }
        Ok(outcome.outbound)
    }
}
