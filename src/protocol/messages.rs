//! Trade Protocol Messages.
//!
//! Messages are communicated between the two parties of one trade: the Maker
//! (who published the offer) and the Taker (who takes it). Buyer and seller
//! are orthogonal to maker and taker; payment-phase messages flow between
//! buyer and seller regardless of who made the offer.
//!
//! The full happy-path message flow of one trade:
//!
//! ```shell
//! ********* Availability *********
//! Taker -> Maker: [TradeMessage::AvailabilityRequest]
//! Maker -> Taker: [TradeMessage::AvailabilityResponse] (maker multisig key + payout script)
//!
//! ********* Deposit Transaction *********
//! Taker -> Maker: [TradeMessage::DepositTxRequest] (taker inputs, keys, contract hash)
//! Maker -> Taker: [TradeMessage::DepositTxResponse] (unsigned combined deposit tx)
//! Taker -> Maker: [TradeMessage::DepositTxSignature] (witnesses for taker inputs)
//! Maker signs own inputs and broadcasts.
//! Maker -> Taker: [TradeMessage::DepositTxPublished]
//!
//! ********* Delayed Payout (safety net, after escrow confirms) *********
//! Maker -> Taker: [TradeMessage::DelayedPayoutTxSignatureRequest]
//! Taker -> Maker: [TradeMessage::DelayedPayoutTxSignatureResponse]
//!
//! ********* Payment & Payout *********
//! Buyer -> Seller: [TradeMessage::PaymentSent]
//! Seller -> Buyer: [TradeMessage::PaymentReceived] (payout tx + seller signature)
//! Buyer co-signs and broadcasts.
//! Buyer -> Seller: [TradeMessage::PayoutTxPublished]
//! ```
//!
//! Every message carries the trade id so the receiving engine can route it
//! to the owning trade. A message arriving in a state that does not expect
//! it is logged and dropped, never applied.

use std::fmt::Display;

use bitcoin::{
    ecdsa::Signature, hashes::sha256::Hash, Amount, OutPoint, PublicKey, ScriptBuf, Transaction,
    Witness,
};
use serde::{Deserialize, Serialize};

/// One unspent output a party contributes to the shared deposit transaction,
/// together with the data the counterparty needs to assemble and check it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RawTransactionInput {
    /// The funding outpoint being spent.
    pub outpoint: OutPoint,
    /// Value of the referenced output.
    pub value: Amount,
    /// Script pubkey of the referenced output. Must be a segwit-v0 spend.
    pub script_pubkey: ScriptBuf,
}

/// Outcome of a maker-side availability check.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityResult {
    /// Offer is open and the request matches its terms.
    Available,
    /// Offer was already taken or withdrawn.
    OfferTaken,
    /// Requested amount is outside the offer or payment method limits.
    AmountOutOfRange,
    /// Requested payment method does not match the offer.
    PaymentMethodMismatch,
    /// Requested price does not match the offer.
    PriceMismatch,
}

/// First message of a trade: the taker asks whether the offer is still open.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AvailabilityRequest {
    /// Offer id; doubles as the trade id from here on.
    pub trade_id: String,
    /// Amount the taker wants to trade.
    pub amount: Amount,
    /// Price the taker saw on the offer.
    pub price: u64,
    /// Payment method the taker will pay with.
    pub payment_method_id: String,
}

/// Maker's answer to an [`AvailabilityRequest`].
///
/// On `Available` carries the maker's contribution to the upcoming contract:
/// its multisig public key and the script its escrow share should be paid
/// out to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AvailabilityResponse {
    /// Trade id.
    pub trade_id: String,
    /// Availability check outcome.
    pub result: AvailabilityResult,
    /// Maker's multisig public key, present when available.
    pub maker_multisig_pubkey: Option<PublicKey>,
    /// Maker's payout script, present when available.
    pub maker_payout_script: Option<ScriptBuf>,
}

/// Taker's contribution to the deposit transaction.
///
/// The contract hash commits the taker to the full negotiated terms; the
/// maker recomputes the hash from its own view of the terms and refuses to
/// build the deposit transaction on a mismatch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DepositTxRequest {
    /// Trade id.
    pub trade_id: String,
    /// Taker's multisig public key.
    pub taker_multisig_pubkey: PublicKey,
    /// Script the taker's escrow share should be paid out to.
    pub taker_payout_script: ScriptBuf,
    /// Inputs the taker contributes to the deposit transaction.
    pub taker_inputs: Vec<RawTransactionInput>,
    /// Taker's change script.
    pub taker_change_script: ScriptBuf,
    /// Hash of the negotiated contract terms as computed by the taker.
    pub contract_hash: Hash,
}

/// Maker's reply carrying the combined, still unsigned deposit transaction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DepositTxResponse {
    /// Trade id.
    pub trade_id: String,
    /// The unsigned deposit transaction combining both parties' inputs.
    pub deposit_tx: Transaction,
    /// Inputs the maker contributed, so the taker can tell the sides apart.
    pub maker_inputs: Vec<RawTransactionInput>,
}

/// Witness the taker produced for one of its own deposit inputs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InputWitness {
    /// Outpoint of the input this witness belongs to.
    pub outpoint: OutPoint,
    /// The finished witness stack.
    pub witness: Witness,
}

/// Taker's signatures over its own inputs of the deposit transaction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DepositTxSignature {
    /// Trade id.
    pub trade_id: String,
    /// One witness per taker input.
    pub witnesses: Vec<InputWitness>,
}

/// Notification that the fully signed deposit transaction hit the network.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DepositTxPublished {
    /// Trade id.
    pub trade_id: String,
    /// The final deposit transaction as broadcast.
    pub deposit_tx: Transaction,
}

/// Request to co-sign the time-locked delayed payout transaction.
///
/// Sent by the maker right after the escrow confirms. The receiver must
/// verify outputs and lock time against the contract before countersigning;
/// a mismatch is fatal for the trade.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DelayedPayoutTxSignatureRequest {
    /// Trade id.
    pub trade_id: String,
    /// The unsigned delayed payout transaction.
    pub delayed_payout_tx: Transaction,
    /// Sender's signature over the escrow input.
    pub signature: Signature,
}

/// Countersignature for the delayed payout transaction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DelayedPayoutTxSignatureResponse {
    /// Trade id.
    pub trade_id: String,
    /// Receiver's signature over the escrow input.
    pub signature: Signature,
}

/// Buyer's notification that the payment leg has been initiated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PaymentSentMsg {
    /// Trade id.
    pub trade_id: String,
    /// Optional payment reference (transfer id, note).
    pub payment_reference: Option<String>,
}

/// Seller's confirmation that the payment arrived, carrying the payout
/// transaction and the seller's signature releasing the escrow.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PaymentReceivedMsg {
    /// Trade id.
    pub trade_id: String,
    /// The unsigned cooperative payout transaction.
    pub payout_tx: Transaction,
    /// Seller's signature over the escrow input.
    pub signature: Signature,
}

/// Notification that the cooperative payout transaction was broadcast.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PayoutTxPublished {
    /// Trade id.
    pub trade_id: String,
    /// The final payout transaction as broadcast.
    pub payout_tx: Transaction,
}

/// All messages exchanged between the two parties of a trade.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum TradeMessage {
    /// Taker asks whether the offer is still open.
    AvailabilityRequest(AvailabilityRequest),
    /// Maker's availability answer.
    AvailabilityResponse(AvailabilityResponse),
    /// Taker's deposit transaction contribution.
    DepositTxRequest(DepositTxRequest),
    /// Maker's combined unsigned deposit transaction.
    DepositTxResponse(DepositTxResponse),
    /// Taker's witnesses for its deposit inputs.
    DepositTxSignature(DepositTxSignature),
    /// Deposit transaction broadcast notification.
    DepositTxPublished(DepositTxPublished),
    /// Request to co-sign the delayed payout transaction.
    DelayedPayoutTxSignatureRequest(DelayedPayoutTxSignatureRequest),
    /// Delayed payout countersignature.
    DelayedPayoutTxSignatureResponse(DelayedPayoutTxSignatureResponse),
    /// Buyer initiated the payment leg.
    PaymentSent(PaymentSentMsg),
    /// Seller confirms payment and signs the payout.
    PaymentReceived(PaymentReceivedMsg),
    /// Payout transaction broadcast notification.
    PayoutTxPublished(PayoutTxPublished),
}

impl TradeMessage {
    /// Trade id the message belongs to.
    pub fn trade_id(&self) -> &str {
        match self {
            Self::AvailabilityRequest(m) => &m.trade_id,
            Self::AvailabilityResponse(m) => &m.trade_id,
            Self::DepositTxRequest(m) => &m.trade_id,
            Self::DepositTxResponse(m) => &m.trade_id,
            Self::DepositTxSignature(m) => &m.trade_id,
            Self::DepositTxPublished(m) => &m.trade_id,
            Self::DelayedPayoutTxSignatureRequest(m) => &m.trade_id,
            Self::DelayedPayoutTxSignatureResponse(m) => &m.trade_id,
            Self::PaymentSent(m) => &m.trade_id,
            Self::PaymentReceived(m) => &m.trade_id,
            Self::PayoutTxPublished(m) => &m.trade_id,
        }
    }
}

impl Display for TradeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AvailabilityRequest(_) => write!(f, "AvailabilityRequest"),
            Self::AvailabilityResponse(_) => write!(f, "AvailabilityResponse"),
            Self::DepositTxRequest(_) => write!(f, "DepositTxRequest"),
            Self::DepositTxResponse(_) => write!(f, "DepositTxResponse"),
            Self::DepositTxSignature(_) => write!(f, "DepositTxSignature"),
            Self::DepositTxPublished(_) => write!(f, "DepositTxPublished"),
            Self::DelayedPayoutTxSignatureRequest(_) => {
                write!(f, "DelayedPayoutTxSignatureRequest")
            }
            Self::DelayedPayoutTxSignatureResponse(_) => {
                write!(f, "DelayedPayoutTxSignatureResponse")
            }
            Self::PaymentSent(_) => write!(f, "PaymentSent"),
            Self::PaymentReceived(_) => write!(f, "PaymentReceived"),
            Self::PayoutTxPublished(_) => write!(f, "PayoutTxPublished"),
        }
    }
}
