//! Task identifiers and the ordered chain each role runs per phase.
//!
//! A chain is a static, ordered list of task ids. The state machine picks
//! the chain, the [`crate::trade::runner::TaskRunner`] walks it, and
//! [`crate::trade::tasks`] maps each id to its step function. Keeping the
//! chains as data makes the per-role protocol sequence reviewable in one
//! place.

use std::fmt;

/// One atomic protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    // Taker side, availability and deposit phases.
    /// Validate the offer terms against the payment catalog.
    TakerValidatesOffer,
    /// Emit the availability request.
    TakerSendsAvailabilityRequest,
    /// Check the maker's availability answer and store its contribution.
    TakerProcessesAvailabilityResponse,
    /// Reserve this party's multisig key in the wallet.
    TakerReservesMultisigKey,
    /// Select funding inputs for the taker's escrow share.
    TakerFundsDepositInputs,
    /// Assemble the contract and commit to its hash.
    TakerCreatesContract,
    /// Emit the deposit transaction request.
    TakerSendsDepositTxRequest,
    /// Verify the maker-built deposit transaction against the contract.
    TakerVerifiesDepositTx,
    /// Sign the taker's own deposit inputs and emit the witnesses.
    TakerSignsDepositTx,
    /// Accept the broadcast deposit transaction and start watching it.
    TakerCommitsDepositTx,

    // Maker side, availability and deposit phases.
    /// Check the offer is open and the request matches its terms.
    MakerChecksOfferAvailability,
    /// Reserve this party's multisig key in the wallet.
    MakerReservesMultisigKey,
    /// Emit the availability response.
    MakerSendsAvailabilityResponse,
    /// Validate and store the taker's contribution; check the contract hash.
    MakerProcessesDepositTxRequest,
    /// Select funding inputs for the maker's escrow share.
    MakerFundsDepositInputs,
    /// Build the combined unsigned deposit transaction.
    MakerCreatesUnsignedDepositTx,
    /// Emit the deposit transaction response.
    MakerSendsDepositTxResponse,
    /// Verify and apply the taker's input witnesses.
    MakerAppliesTakerWitnesses,
    /// Sign the maker's own deposit inputs.
    MakerSignsDepositTx,
    /// Broadcast the deposit transaction and notify the taker.
    MakerBroadcastsDepositTx,

    // Escrow confirmation and the delayed payout safety net.
    /// Record the escrow confirmation after checking depth with the wallet.
    RecordsDepositConfirmation,
    /// Build the time-locked delayed payout transaction.
    MakerCreatesDelayedPayoutTx,
    /// Sign the delayed payout and request the countersignature.
    MakerSignsDelayedPayoutTx,
    /// Verify the delayed payout outputs and lock time against the contract.
    TakerVerifiesDelayedPayoutTx,
    /// Countersign the delayed payout and emit the response.
    TakerSignsDelayedPayoutTx,
    /// Verify the taker's delayed payout countersignature.
    MakerVerifiesDelayedPayoutSig,
    /// Store the fully signed delayed payout transaction.
    MakerFinalizesDelayedPayoutTx,

    // Payment and cooperative payout phases.
    /// Emit the buyer's payment-sent notice.
    BuyerSendsPaymentSent,
    /// Record the buyer's payment-sent notice.
    SellerProcessesPaymentSent,
    /// Build the cooperative payout transaction.
    SellerCreatesPayoutTx,
    /// Sign the payout and emit the payment-received notice.
    SellerSignsPayoutTx,
    /// Verify the payout transaction and the seller's signature.
    BuyerProcessesPaymentReceived,
    /// Co-sign the payout transaction.
    BuyerSignsPayoutTx,
    /// Broadcast the payout and notify the seller.
    BuyerBroadcastsPayoutTx,
    /// Verify the broadcast payout and release wallet reservations.
    SellerProcessesPayoutPublished,

    // Dispute fallback.
    /// Mark the dispute open; the payload is assembled for the mediator.
    PreparesDisputePayload,
    /// Verify and broadcast the mediator-signed release.
    AppliesDisputeResolution,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One chain of tasks, as selected by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainId {
    /// Taker kicks off a trade over a taken offer.
    TakerStartsTrade,
    /// Taker reacts to the availability answer and contributes its inputs.
    TakerProcessesAvailability,
    /// Taker verifies and co-signs the deposit transaction.
    TakerSignsDeposit,
    /// Taker accepts the broadcast deposit transaction.
    TakerCommitsDeposit,
    /// Taker records the escrow confirmation.
    TakerConfirmsDeposit,
    /// Taker co-signs the delayed payout safety net.
    TakerCosignsDelayedPayout,
    /// Maker answers an availability request.
    MakerProcessesAvailability,
    /// Maker builds the combined deposit transaction.
    MakerCreatesDeposit,
    /// Maker finalizes and broadcasts the deposit transaction.
    MakerPublishesDeposit,
    /// Maker records the confirmation and starts the delayed payout.
    MakerConfirmsDeposit,
    /// Maker stores the fully signed delayed payout.
    MakerFinalizesDelayedPayout,
    /// Buyer reports the payment leg initiated.
    BuyerSendsPayment,
    /// Seller records the payment-sent notice.
    SellerRecordsPayment,
    /// Seller confirms receipt and authorizes the payout.
    SellerAuthorizesPayout,
    /// Buyer completes and broadcasts the payout.
    BuyerPublishesPayout,
    /// Seller observes the payout and closes out.
    SellerCompletesTrade,
    /// Either party escalates to the mediator.
    OpensDispute,
    /// Mediator resolution is applied.
    ClosesDispute,
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The ordered task list of a chain.
pub fn chain_tasks(chain: ChainId) -> &'static [TaskId] {
    use TaskId::*;
    match chain {
        ChainId::TakerStartsTrade => &[TakerValidatesOffer, TakerSendsAvailabilityRequest],
        ChainId::TakerProcessesAvailability => &[
            TakerProcessesAvailabilityResponse,
            TakerReservesMultisigKey,
            TakerFundsDepositInputs,
            TakerCreatesContract,
            TakerSendsDepositTxRequest,
        ],
        ChainId::TakerSignsDeposit => &[TakerVerifiesDepositTx, TakerSignsDepositTx],
        ChainId::TakerCommitsDeposit => &[TakerCommitsDepositTx],
        ChainId::TakerConfirmsDeposit => &[RecordsDepositConfirmation],
        ChainId::TakerCosignsDelayedPayout => {
            &[TakerVerifiesDelayedPayoutTx, TakerSignsDelayedPayoutTx]
        }
        ChainId::MakerProcessesAvailability => &[
            MakerChecksOfferAvailability,
            MakerReservesMultisigKey,
            MakerSendsAvailabilityResponse,
        ],
        ChainId::MakerCreatesDeposit => &[
            MakerProcessesDepositTxRequest,
            MakerFundsDepositInputs,
            MakerCreatesUnsignedDepositTx,
            MakerSendsDepositTxResponse,
        ],
        ChainId::MakerPublishesDeposit => &[
            MakerAppliesTakerWitnesses,
            MakerSignsDepositTx,
            MakerBroadcastsDepositTx,
        ],
        ChainId::MakerConfirmsDeposit => &[
            RecordsDepositConfirmation,
            MakerCreatesDelayedPayoutTx,
            MakerSignsDelayedPayoutTx,
        ],
        ChainId::MakerFinalizesDelayedPayout => {
            &[MakerVerifiesDelayedPayoutSig, MakerFinalizesDelayedPayoutTx]
        }
        ChainId::BuyerSendsPayment => &[BuyerSendsPaymentSent],
        ChainId::SellerRecordsPayment => &[SellerProcessesPaymentSent],
        ChainId::SellerAuthorizesPayout => &[SellerCreatesPayoutTx, SellerSignsPayoutTx],
        ChainId::BuyerPublishesPayout => &[
            BuyerProcessesPaymentReceived,
            BuyerSignsPayoutTx,
            BuyerBroadcastsPayoutTx,
        ],
        ChainId::SellerCompletesTrade => &[SellerProcessesPayoutPublished],
        ChainId::OpensDispute => &[PreparesDisputePayload],
        ChainId::ClosesDispute => &[AppliesDisputeResolution],
    }
}
