//! The per-trade protocol engine: trade aggregate, state machine, task
//! chains and persistence.

pub mod chains;
pub mod dispute;
pub mod fsm;
pub mod process_model;
pub mod runner;
pub mod store;
pub mod tasks;

use std::fmt;

use bitcoin::{Amount, Txid};
use serde::{Deserialize, Serialize};

use crate::offer::{Offer, OfferDirection};

/// Which side of the trade this party is on.
///
/// Maker/taker describes who published the offer; buyer/seller describes
/// who receives the base asset. Both axes matter: each of the four
/// combinations runs its own task-chain variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeRole {
    /// Published a buy offer; receives the base asset.
    MakerBuyer,
    /// Published a sell offer; delivers the base asset.
    MakerSeller,
    /// Took a sell offer; receives the base asset.
    TakerBuyer,
    /// Took a buy offer; delivers the base asset.
    TakerSeller,
}

impl TradeRole {
    /// Role of the party who published the offer.
    pub fn maker_from_offer(offer: &Offer) -> Self {
        match offer.direction {
            OfferDirection::Buy => TradeRole::MakerBuyer,
            OfferDirection::Sell => TradeRole::MakerSeller,
        }
    }

    /// Role of the party taking the offer.
    pub fn taker_from_offer(offer: &Offer) -> Self {
        match offer.direction {
            OfferDirection::Buy => TradeRole::TakerSeller,
            OfferDirection::Sell => TradeRole::TakerBuyer,
        }
    }

    /// Whether this party published the offer.
    pub fn is_maker(&self) -> bool {
        matches!(self, TradeRole::MakerBuyer | TradeRole::MakerSeller)
    }

    /// Whether this party receives the base asset.
    pub fn is_buyer(&self) -> bool {
        matches!(self, TradeRole::MakerBuyer | TradeRole::TakerBuyer)
    }
}

/// Protocol state of one trade.
///
/// Derives `PartialOrd`/`Ord` so phase comparisons like
/// `state >= DepositTxConfirmed` work naturally. Variant order matters —
/// they must be listed in lifecycle order. [`Trade::advance_state`] only
/// ever moves forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash,
)]
pub enum TradeState {
    /// Trade created, availability handshake not finished.
    #[default]
    Init,
    /// Offer confirmed open; deposit construction may begin.
    AvailabilityChecked,
    /// Deposit transaction broadcast. Point of no return.
    DepositTxPublished,
    /// Escrow confirmed on chain.
    DepositTxConfirmed,
    /// Buyer reported the payment leg initiated.
    PaymentSent,
    /// Seller confirmed the payment arrived.
    PaymentReceived,
    /// Cooperative payout broadcast; trade complete.
    PayoutPublished,
    /// A party escalated to the mediator.
    DisputeOpened,
    /// Mediator resolution applied.
    DisputeClosed,
    /// Unrecoverable validation failure; see the trade's error message.
    Failed,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeState::Init => write!(f, "Init"),
            TradeState::AvailabilityChecked => write!(f, "AvailabilityChecked"),
            TradeState::DepositTxPublished => write!(f, "DepositTxPublished"),
            TradeState::DepositTxConfirmed => write!(f, "DepositTxConfirmed"),
            TradeState::PaymentSent => write!(f, "PaymentSent"),
            TradeState::PaymentReceived => write!(f, "PaymentReceived"),
            TradeState::PayoutPublished => write!(f, "PayoutPublished"),
            TradeState::DisputeOpened => write!(f, "DisputeOpened"),
            TradeState::DisputeClosed => write!(f, "DisputeClosed"),
            TradeState::Failed => write!(f, "Failed"),
        }
    }
}

/// Aggregate root of one negotiated exchange.
///
/// Created when an offer is taken, archived when payout completes or a
/// dispute resolves. The engine's arena owns it; task chains borrow it
/// exclusively for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Trade id (the taken offer's id).
    pub id: String,
    /// This party's role.
    pub role: TradeRole,
    /// The offer terms the trade was created from.
    pub offer: Offer,
    /// Current protocol state.
    pub state: TradeState,
    /// Human-readable failure description, if any step failed.
    pub error_message: Option<String>,
    /// Txid of the broadcast deposit transaction.
    pub deposit_txid: Option<Txid>,
    /// Unix timestamp of the escrow confirmation.
    pub deposit_confirm_time: Option<u64>,
}

impl Trade {
    /// Creates a trade for this party's role over the given offer.
    pub fn new(offer: Offer, role: TradeRole) -> Self {
        Self {
            id: offer.id.clone(),
            role,
            offer,
            state: TradeState::Init,
            error_message: None,
            deposit_txid: None,
            deposit_confirm_time: None,
        }
    }

    /// Trade amount.
    pub fn amount(&self) -> Amount {
        self.offer.amount
    }

    /// Advances the protocol state. Backward moves are refused and logged;
    /// states only ever increase.
    pub fn advance_state(&mut self, new_state: TradeState) -> bool {
        if new_state <= self.state {
            log::warn!(
                "[{}] Refusing state regression {} -> {}",
                self.id,
                self.state,
                new_state
            );
            return false;
        }
        log::info!("[{}] State {} -> {}", self.id, self.state, new_state);
        self.state = new_state;
        true
    }

    /// Records a failure on the trade. Validation failures additionally
    /// move the trade to [`TradeState::Failed`].
    pub fn record_failure(&mut self, message: String, fatal: bool) {
        log::error!("[{}] Task failure: {}", self.id, message);
        self.error_message = Some(message);
        if fatal {
            self.state = TradeState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::OfferDirection;

    fn offer() -> Offer {
        Offer {
            id: "offer-1".to_string(),
            direction: OfferDirection::Sell,
            amount: Amount::from_sat(50_000_000),
            price: 60_000,
            buyer_security_deposit: Amount::from_sat(5_000_000),
            seller_security_deposit: Amount::from_sat(5_000_000),
            payment_method_id: "SEPA".to_string(),
        }
    }

    #[test]
    fn test_roles_from_offer_direction() {
        let sell = offer();
        assert_eq!(TradeRole::maker_from_offer(&sell), TradeRole::MakerSeller);
        assert_eq!(TradeRole::taker_from_offer(&sell), TradeRole::TakerBuyer);
        assert!(TradeRole::MakerSeller.is_maker());
        assert!(!TradeRole::MakerSeller.is_buyer());
        assert!(TradeRole::TakerBuyer.is_buyer());
    }

    #[test]
    fn test_state_only_advances() {
        let mut trade = Trade::new(offer(), TradeRole::TakerBuyer);
        assert!(trade.advance_state(TradeState::AvailabilityChecked));
        assert!(trade.advance_state(TradeState::DepositTxPublished));
        // No going back, no staying put.
        assert!(!trade.advance_state(TradeState::AvailabilityChecked));
        assert!(!trade.advance_state(TradeState::DepositTxPublished));
        assert_eq!(trade.state, TradeState::DepositTxPublished);
    }

    #[test]
    fn test_state_order_matches_lifecycle() {
        assert!(TradeState::Init < TradeState::AvailabilityChecked);
        assert!(TradeState::DepositTxConfirmed < TradeState::PaymentSent);
        assert!(TradeState::PaymentReceived < TradeState::PayoutPublished);
        assert!(TradeState::DepositTxConfirmed < TradeState::DisputeOpened);
    }

    #[test]
    fn test_record_failure_marks_failed_only_when_fatal() {
        let mut trade = Trade::new(offer(), TradeRole::MakerSeller);
        trade.advance_state(TradeState::AvailabilityChecked);
        trade.record_failure("wallet rpc timed out".to_string(), false);
        assert_eq!(trade.state, TradeState::AvailabilityChecked);
        trade.record_failure("contract hash mismatch".to_string(), true);
        assert_eq!(trade.state, TradeState::Failed);
    }
}
