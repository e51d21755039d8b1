//! Protocol task steps.
//!
//! Every task is a function `(&mut TradeContext) -> Result<StepOutput,
//! StepError>`, dispatched by [`run`] from its [`TaskId`]. A task performs
//! one idempotent-as-possible protocol step: it validates, mutates the
//! trade's [`ProcessModel`], talks to the wallet, and optionally hands one
//! outbound message back to the runner. Tasks never loop, never sleep and
//! never retry; re-dispatch is the caller's decision.
//!
//! Retry policy: cheap structural checks re-run on every dispatch, while
//! signature verifications already recorded in
//! [`crate::trade::process_model::VerifiedFlags`] are trusted.

pub mod buyer;
pub mod maker;
pub mod seller;
pub mod taker;

use bitcoin::{Amount, OutPoint, PublicKey};

use crate::{
    config::EngineConfig,
    error::ProtocolError,
    payment::PaymentMethodRegistry,
    protocol::{
        contract::{self, TradeContract},
        error::ContractError,
        messages::TradeMessage,
    },
    trade::{
        chains::TaskId,
        fsm::TradeEvent,
        process_model::ProcessModel,
        Trade,
    },
    wallet::{WalletApi, WalletError},
};

/// Everything a task may touch while it runs: the trade and its scratch
/// state borrowed exclusively, the service boundaries shared.
pub struct TradeContext<'a> {
    /// The trade being driven.
    pub trade: &'a mut Trade,
    /// The trade's scratch state.
    pub model: &'a mut ProcessModel,
    /// The wallet boundary.
    pub wallet: &'a dyn WalletApi,
    /// The payment method catalog.
    pub methods: &'a PaymentMethodRegistry,
    /// Engine configuration (fees, confirmation depth, dispute window).
    pub config: &'a EngineConfig,
    /// Optional arbitrator key turning new escrows into 2-of-3.
    pub arbitrator: Option<PublicKey>,
    /// The event that triggered the current chain.
    pub event: &'a TradeEvent,
}

/// What a completed task hands back to the runner.
#[derive(Debug, Default)]
pub struct StepOutput {
    /// Message to send to the counterparty, if any.
    pub outbound: Option<TradeMessage>,
    /// When set, the chain stops here without advancing the trade state.
    pub halt: bool,
}

impl StepOutput {
    /// Step finished, nothing to send.
    pub fn done() -> Self {
        Self::default()
    }

    /// Step finished and produced an outbound message.
    pub fn send(message: TradeMessage) -> Self {
        Self {
            outbound: Some(message),
            halt: false,
        }
    }

    /// Step declines to continue the chain; the optional message tells the
    /// counterparty why. The task records the failure on the trade itself.
    pub fn reject(message: Option<TradeMessage>) -> Self {
        Self {
            outbound: message,
            halt: true,
        }
    }
}

/// Typed failure reason of a task.
#[derive(Debug)]
pub enum StepErrorKind {
    /// Counterparty data or local invariants failed validation. Fatal.
    Validation,
    /// Protocol sequencing violation. Fatal.
    Protocol(ProtocolError),
    /// Escrow contract construction or verification failure. Fatal.
    Contract(ContractError),
    /// Wallet trouble (node unreachable, signing failed). Retriable.
    Wallet(WalletError),
    /// Other transient trouble, retriable on the next trigger.
    Transient,
}

/// A task failure: the typed reason plus human-readable context that ends
/// up on the trade's error message.
#[derive(Debug)]
pub struct StepError {
    /// Why the step failed.
    pub kind: StepErrorKind,
    /// Context for the trade's error message.
    pub context: String,
}

impl StepError {
    /// A fatal validation failure.
    pub fn validation(context: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Validation,
            context: context.into(),
        }
    }

    /// A retriable failure; the trade stays in its current state.
    pub fn transient(context: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Transient,
            context: context.into(),
        }
    }

    /// Whether this failure ends the trade (true) or only the current
    /// chain run (false).
    pub fn is_fatal(&self) -> bool {
        match self.kind {
            StepErrorKind::Validation
            | StepErrorKind::Protocol(_)
            | StepErrorKind::Contract(_) => true,
            StepErrorKind::Wallet(_) | StepErrorKind::Transient => false,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl From<ProtocolError> for StepError {
    fn from(value: ProtocolError) -> Self {
        Self {
            context: value.to_string(),
            kind: StepErrorKind::Protocol(value),
        }
    }
}

impl From<ContractError> for StepError {
    fn from(value: ContractError) -> Self {
        Self {
            context: value.to_string(),
            kind: StepErrorKind::Contract(value),
        }
    }
}

impl From<WalletError> for StepError {
    fn from(value: WalletError) -> Self {
        Self {
            context: value.to_string(),
            kind: StepErrorKind::Wallet(value),
        }
    }
}

/// Runs one task against the trade context.
pub fn run(task: TaskId, ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    log::debug!("[{}] Running task {}", ctx.trade.id, task);
    match task {
        TaskId::TakerValidatesOffer => taker::validates_offer(ctx),
        TaskId::TakerSendsAvailabilityRequest => taker::sends_availability_request(ctx),
        TaskId::TakerProcessesAvailabilityResponse => {
            taker::processes_availability_response(ctx)
        }
        TaskId::TakerReservesMultisigKey | TaskId::MakerReservesMultisigKey => {
            reserves_multisig_key(ctx)
        }
        TaskId::TakerFundsDepositInputs | TaskId::MakerFundsDepositInputs => {
            funds_deposit_inputs(ctx)
        }
        TaskId::TakerCreatesContract => taker::creates_contract(ctx),
        TaskId::TakerSendsDepositTxRequest => taker::sends_deposit_tx_request(ctx),
        TaskId::TakerVerifiesDepositTx => taker::verifies_deposit_tx(ctx),
        TaskId::TakerSignsDepositTx => taker::signs_deposit_tx(ctx),
        TaskId::TakerCommitsDepositTx => taker::commits_deposit_tx(ctx),
        TaskId::MakerChecksOfferAvailability => maker::checks_offer_availability(ctx),
        TaskId::MakerSendsAvailabilityResponse => maker::sends_availability_response(ctx),
        TaskId::MakerProcessesDepositTxRequest => maker::processes_deposit_tx_request(ctx),
        TaskId::MakerCreatesUnsignedDepositTx => maker::creates_unsigned_deposit_tx(ctx),
        TaskId::MakerSendsDepositTxResponse => maker::sends_deposit_tx_response(ctx),
        TaskId::MakerAppliesTakerWitnesses => maker::applies_taker_witnesses(ctx),
        TaskId::MakerSignsDepositTx => maker::signs_deposit_tx(ctx),
        TaskId::MakerBroadcastsDepositTx => maker::broadcasts_deposit_tx(ctx),
        TaskId::RecordsDepositConfirmation => records_deposit_confirmation(ctx),
        TaskId::MakerCreatesDelayedPayoutTx => maker::creates_delayed_payout_tx(ctx),
        TaskId::MakerSignsDelayedPayoutTx => maker::signs_delayed_payout_tx(ctx),
        TaskId::TakerVerifiesDelayedPayoutTx => taker::verifies_delayed_payout_tx(ctx),
        TaskId::TakerSignsDelayedPayoutTx => taker::signs_delayed_payout_tx(ctx),
        TaskId::MakerVerifiesDelayedPayoutSig => maker::verifies_delayed_payout_sig(ctx),
        TaskId::MakerFinalizesDelayedPayoutTx => maker::finalizes_delayed_payout_tx(ctx),
        TaskId::BuyerSendsPaymentSent => buyer::sends_payment_sent(ctx),
        TaskId::SellerProcessesPaymentSent => seller::processes_payment_sent(ctx),
        TaskId::SellerCreatesPayoutTx => seller::creates_payout_tx(ctx),
        TaskId::SellerSignsPayoutTx => seller::signs_payout_tx(ctx),
        TaskId::BuyerProcessesPaymentReceived => buyer::processes_payment_received(ctx),
        TaskId::BuyerSignsPayoutTx => buyer::signs_payout_tx(ctx),
        TaskId::BuyerBroadcastsPayoutTx => buyer::broadcasts_payout_tx(ctx),
        TaskId::SellerProcessesPayoutPublished => seller::processes_payout_published(ctx),
        TaskId::PreparesDisputePayload => prepares_dispute_payload(ctx),
        TaskId::AppliesDisputeResolution => applies_dispute_resolution(ctx),
    }
}

// Helpers shared by the role modules.

/// The triggering event as a protocol message, or a protocol error.
pub(crate) fn event_message<'a>(ctx: &'a TradeContext) -> Result<&'a TradeMessage, StepError> {
    match ctx.event {
        TradeEvent::Message(message) => Ok(message),
        other => Err(ProtocolError::WrongMessage {
            expected: "a protocol message".to_string(),
            received: other.to_string(),
        }
        .into()),
    }
}

/// The amount this party owes into the escrow.
pub(crate) fn own_escrow_share(ctx: &TradeContext) -> Result<Amount, StepError> {
    let offer = &ctx.trade.offer;
    if ctx.trade.role.is_buyer() {
        Ok(offer.buyer_security_deposit)
    } else {
        offer
            .amount
            .checked_add(offer.seller_security_deposit)
            .ok_or_else(|| StepError::from(ContractError::AmountOverflow))
    }
}

/// The negotiated contract together with the escrow outpoint and value of
/// the broadcast deposit transaction.
pub(crate) fn contract_and_escrow(
    ctx: &TradeContext,
) -> Result<(TradeContract, OutPoint, Amount), StepError> {
    let contract = ctx.model.contract()?.clone();
    let deposit_tx = ctx
        .model
        .deposit_tx
        .as_ref()
        .ok_or(ProtocolError::MissingPeerData("broadcast deposit tx"))?;
    let vout = contract::find_escrow_output(deposit_tx, &contract)?;
    let outpoint = OutPoint {
        txid: deposit_tx.compute_txid(),
        vout: vout as u32,
    };
    let value = contract.escrow_value()?;
    Ok((contract, outpoint, value))
}

/// Reserves (or re-reads) this party's multisig key and payout script, and
/// cross-checks the key against the wallet's reservation record.
fn reserves_multisig_key(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let pubkey = ctx.wallet.reserve_multisig_key(&ctx.trade.id)?;
    let entry = ctx
        .wallet
        .multisig_key_entry(&ctx.trade.id)?
        .ok_or_else(|| WalletError::MissingReservation(ctx.trade.id.clone()))?;
    if entry.pubkey != pubkey {
        return Err(ProtocolError::MultisigKeyMismatch.into());
    }
    if let Some(existing) = ctx.model.my_multisig_pubkey {
        // Key material is fixed once reserved.
        if existing != pubkey {
            return Err(ProtocolError::MultisigKeyMismatch.into());
        }
    }
    ctx.model.my_multisig_pubkey = Some(pubkey);
    if ctx.model.my_payout_script.is_none() {
        ctx.model.my_payout_script = Some(ctx.wallet.fresh_script_pubkey()?);
    }
    Ok(StepOutput::done())
}

/// Selects funding inputs covering this party's escrow share plus the full
/// deposit fee budget. Reuses an earlier selection so a chain re-dispatch
/// cannot swap coins under an already-shared contribution.
fn funds_deposit_inputs(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    if ctx.model.deposit_tx.is_some() || !ctx.model.my_inputs.is_empty() {
        return Ok(StepOutput::done());
    }
    let owed = own_escrow_share(ctx)?;
    let target = owed
        .checked_add(Amount::from_sat(ctx.config.deposit_tx_fee))
        .ok_or_else(|| StepError::from(ContractError::AmountOverflow))?;
    let selection = ctx.wallet.select_funding_inputs(target)?;
    ctx.model.my_inputs = selection.inputs;
    ctx.model.my_change_script = Some(selection.change_script);
    Ok(StepOutput::done())
}

/// Records the escrow confirmation after checking depth with the wallet.
fn records_deposit_confirmation(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let time = match ctx.event {
        TradeEvent::DepositConfirmed { time } => *time,
        other => {
            return Err(ProtocolError::WrongMessage {
                expected: "DepositConfirmed".to_string(),
                received: other.to_string(),
            }
            .into())
        }
    };
    let txid = ctx
        .trade
        .deposit_txid
        .ok_or(ProtocolError::MissingPeerData("deposit txid"))?;
    let confirms = ctx.wallet.confirmations(&txid)?;
    if confirms < ctx.config.required_confirms {
        return Err(StepError::transient(format!(
            "deposit tx {txid} has {confirms} confirmations, need {}",
            ctx.config.required_confirms
        )));
    }
    ctx.trade.deposit_confirm_time = Some(time);
    log::info!(
        "[{}] Escrow confirmed at {} with {} confirmations",
        ctx.trade.id,
        time,
        confirms
    );
    Ok(StepOutput::done())
}

/// Marks the dispute open and stashes the evidence for the payload.
fn prepares_dispute_payload(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let evidence = match ctx.event {
        TradeEvent::OpenDispute { evidence } => evidence.clone(),
        other => {
            return Err(ProtocolError::WrongMessage {
                expected: "OpenDispute".to_string(),
                received: other.to_string(),
            }
            .into())
        }
    };
    // The contract must exist; without it there is nothing to dispute over.
    ctx.model.contract()?;
    ctx.model.dispute_evidence = evidence;
    log::warn!("[{}] Dispute opened", ctx.trade.id);
    Ok(StepOutput::done())
}

/// Verifies the mediator's signed release spends our escrow, then
/// broadcasts it.
fn applies_dispute_resolution(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let resolution = match ctx.event {
        TradeEvent::DisputeResolved(resolution) => resolution.clone(),
        other => {
            return Err(ProtocolError::WrongMessage {
                expected: "DisputeResolved".to_string(),
                received: other.to_string(),
            }
            .into())
        }
    };
    let (_, escrow_outpoint, _) = contract_and_escrow(ctx)?;
    let spends_escrow = resolution
        .signed_payout_tx
        .input
        .iter()
        .any(|txin| txin.previous_output == escrow_outpoint);
    if !spends_escrow {
        return Err(StepError::validation(
            "mediator release does not spend the trade's escrow output",
        ));
    }
    let txid = ctx.wallet.broadcast(&resolution.signed_payout_tx)?;
    ctx.model.payout_tx = Some(resolution.signed_payout_tx);
    ctx.wallet.release_trade_keys(&ctx.trade.id)?;
    log::info!("[{}] Dispute resolution broadcast as {}", ctx.trade.id, txid);
    Ok(StepOutput::done())
}
