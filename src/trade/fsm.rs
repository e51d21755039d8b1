//! The trade state machine.
//!
//! One explicit table maps `(role, current state, incoming event)` to the
//! chain to run and the state the trade advances to when that chain
//! completes. Everything not in the table is an illegal transition: the
//! event is logged and dropped, never applied. That single rule is what
//! makes duplicate and out-of-order peer messages harmless.

use crate::protocol::messages::TradeMessage;

use super::{dispute::DisputeResolution, chains::ChainId, TradeRole, TradeState};

/// Everything that can drive a trade forward.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    /// Local user takes an offer (taker only, creates the trade).
    TakeOffer,
    /// A decoded protocol message from the counterparty.
    Message(TradeMessage),
    /// The wallet observed the escrow reach the required depth.
    DepositConfirmed {
        /// Unix timestamp of the confirmation.
        time: u64,
    },
    /// Local user confirms the payment leg was initiated (buyer only).
    PaymentSent,
    /// Local user confirms the payment arrived (seller only).
    PaymentReceived,
    /// Local user (or a timeout policy upstream) escalates to the mediator.
    OpenDispute {
        /// Free-form evidence strings handed to the mediator.
        evidence: Vec<String>,
    },
    /// The mediator's signed release came back.
    DisputeResolved(DisputeResolution),
}

impl std::fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeEvent::TakeOffer => write!(f, "TakeOffer"),
            TradeEvent::Message(m) => write!(f, "Message({m})"),
            TradeEvent::DepositConfirmed { .. } => write!(f, "DepositConfirmed"),
            TradeEvent::PaymentSent => write!(f, "PaymentSent"),
            TradeEvent::PaymentReceived => write!(f, "PaymentReceived"),
            TradeEvent::OpenDispute { .. } => write!(f, "OpenDispute"),
            TradeEvent::DisputeResolved(_) => write!(f, "DisputeResolved"),
        }
    }
}

/// A legal transition: the chain to run now and the state the trade moves
/// to once the chain completes (`None` keeps the current state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Chain the runner executes for this event.
    pub chain: ChainId,
    /// State applied after successful completion.
    pub next: Option<TradeState>,
}

fn t(chain: ChainId, next: Option<TradeState>) -> Option<Transition> {
    Some(Transition { chain, next })
}

/// Looks up the transition for an event arriving in the given role/state.
///
/// Returns `None` for anything the current state does not expect; the
/// caller logs and drops the event without touching the trade.
pub fn transition(role: TradeRole, state: TradeState, event: &TradeEvent) -> Option<Transition> {
    use TradeState::*;
    let maker = role.is_maker();
    let buyer = role.is_buyer();

    match event {
        TradeEvent::TakeOffer if !maker && state == Init => {
            t(ChainId::TakerStartsTrade, None)
        }

        TradeEvent::DepositConfirmed { .. } if state == DepositTxPublished => {
            if maker {
                t(ChainId::MakerConfirmsDeposit, Some(DepositTxConfirmed))
            } else {
                t(ChainId::TakerConfirmsDeposit, Some(DepositTxConfirmed))
            }
        }

        TradeEvent::PaymentSent if buyer && state == DepositTxConfirmed => {
            t(ChainId::BuyerSendsPayment, Some(PaymentSent))
        }

        TradeEvent::PaymentReceived if !buyer && state == PaymentSent => {
            t(ChainId::SellerAuthorizesPayout, Some(PaymentReceived))
        }

        TradeEvent::OpenDispute { .. }
            if state >= DepositTxConfirmed && state < PayoutPublished =>
        {
            t(ChainId::OpensDispute, Some(DisputeOpened))
        }

        TradeEvent::DisputeResolved(_) if state == DisputeOpened => {
            t(ChainId::ClosesDispute, Some(DisputeClosed))
        }

        TradeEvent::Message(message) => match (message, state) {
            (TradeMessage::AvailabilityRequest(_), Init) if maker => {
                t(ChainId::MakerProcessesAvailability, Some(AvailabilityChecked))
            }
            (TradeMessage::AvailabilityResponse(_), Init) if !maker => {
                t(ChainId::TakerProcessesAvailability, Some(AvailabilityChecked))
            }
            (TradeMessage::DepositTxRequest(_), AvailabilityChecked) if maker => {
                t(ChainId::MakerCreatesDeposit, None)
            }
            (TradeMessage::DepositTxResponse(_), AvailabilityChecked) if !maker => {
                t(ChainId::TakerSignsDeposit, None)
            }
            (TradeMessage::DepositTxSignature(_), AvailabilityChecked) if maker => {
                t(ChainId::MakerPublishesDeposit, Some(DepositTxPublished))
            }
            (TradeMessage::DepositTxPublished(_), AvailabilityChecked) if !maker => {
                t(ChainId::TakerCommitsDeposit, Some(DepositTxPublished))
            }
            (TradeMessage::DelayedPayoutTxSignatureRequest(_), DepositTxConfirmed)
                if !maker =>
            {
                t(ChainId::TakerCosignsDelayedPayout, None)
            }
            (TradeMessage::DelayedPayoutTxSignatureResponse(_), DepositTxConfirmed)
                if maker =>
            {
                t(ChainId::MakerFinalizesDelayedPayout, None)
            }
            (TradeMessage::PaymentSent(_), DepositTxConfirmed) if !buyer => {
                t(ChainId::SellerRecordsPayment, Some(PaymentSent))
            }
            (TradeMessage::PaymentReceived(_), PaymentSent) if buyer => {
                t(ChainId::BuyerPublishesPayout, Some(PayoutPublished))
            }
            (TradeMessage::PayoutTxPublished(_), PaymentReceived) if !buyer => {
                t(ChainId::SellerCompletesTrade, Some(PayoutPublished))
            }
            _ => None,
        },

        _ => None,
    }
}
