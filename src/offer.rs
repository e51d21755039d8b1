//! Offer terms as agreed between maker and taker.
//!
//! Offer-book discovery and broadcast live outside this crate; what arrives
//! here is one concrete offer being taken. The offer id doubles as the trade
//! id for the resulting trade.

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::payment::PaymentMethodRegistry;

/// Side of the traded pair the maker is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferDirection {
    /// Maker buys the base asset (taker sells).
    Buy,
    /// Maker sells the base asset (taker buys).
    Sell,
}

/// One published offer. All amounts are in the base asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Unique offer id; becomes the trade id when taken.
    pub id: String,
    /// Maker's side of the pair.
    pub direction: OfferDirection,
    /// Trade amount.
    pub amount: Amount,
    /// Agreed price in counter-asset atomic units per base unit.
    pub price: u64,
    /// Security deposit the buyer locks into escrow.
    pub buyer_security_deposit: Amount,
    /// Security deposit the seller locks into escrow.
    pub seller_security_deposit: Amount,
    /// Payment method id for the payment leg (see [`crate::payment`]).
    pub payment_method_id: String,
}

/// Errors found while validating an offer against the payment catalog.
#[derive(Debug, PartialEq, Eq)]
pub enum OfferError {
    /// The offer names a payment method the catalog doesn't know.
    UnknownPaymentMethod(String),
    /// The trade amount exceeds the payment method's limit.
    AboveTradeLimit {
        /// Amount the offer asks for.
        amount: Amount,
        /// Limit the payment method allows.
        limit: Amount,
    },
    /// Zero-amount or zero-price offers are meaningless.
    EmptyTerms,
    /// Both security deposits must be non-zero to disincentivize abandonment.
    MissingSecurityDeposit,
}

impl std::fmt::Display for OfferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for OfferError {}

impl Offer {
    /// Validates the offer terms against the payment method catalog.
    pub fn validate(&self, registry: &PaymentMethodRegistry) -> Result<(), OfferError> {
        if self.amount == Amount::ZERO || self.price == 0 {
            return Err(OfferError::EmptyTerms);
        }
        if self.buyer_security_deposit == Amount::ZERO
            || self.seller_security_deposit == Amount::ZERO
        {
            return Err(OfferError::MissingSecurityDeposit);
        }
        let method = registry
            .get(&self.payment_method_id)
            .ok_or_else(|| OfferError::UnknownPaymentMethod(self.payment_method_id.clone()))?;
        if self.amount > method.trade_limit {
            return Err(OfferError::AboveTradeLimit {
                amount: self.amount,
                limit: method.trade_limit,
            });
        }
        Ok(())
    }
}
