//! Maker-side protocol steps: availability answering, deposit transaction
//! construction and broadcast, and the delayed payout round.

use bitcoin::Amount;

use crate::{
    error::ProtocolError,
    protocol::{
        contract::{self, PartyInputs, TradeContract},
        messages::{
            AvailabilityResponse, AvailabilityResult, DelayedPayoutTxSignatureRequest,
            DepositTxPublished, DepositTxResponse, TradeMessage,
        },
    },
};

use super::{contract_and_escrow, event_message, StepError, StepOutput, TradeContext};

/// Checks the availability request against the published offer. A mismatch
/// declines the trade with a typed result instead of going silent.
pub(super) fn checks_offer_availability(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::AvailabilityRequest(request) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "AvailabilityRequest".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let request = request.clone();
    let offer = &ctx.trade.offer;

    let result = if request.payment_method_id != offer.payment_method_id {
        AvailabilityResult::PaymentMethodMismatch
    } else if request.price != offer.price {
        AvailabilityResult::PriceMismatch
    } else if request.amount != offer.amount
        || !ctx.methods.is_within_limit(&offer.payment_method_id, request.amount)
    {
        AvailabilityResult::AmountOutOfRange
    } else {
        AvailabilityResult::Available
    };

    if result != AvailabilityResult::Available {
        ctx.trade
            .record_failure(format!("availability check failed: {result:?}"), true);
        return Ok(StepOutput::reject(Some(TradeMessage::AvailabilityResponse(
            AvailabilityResponse {
                trade_id: ctx.trade.id.clone(),
                result,
                maker_multisig_pubkey: None,
                maker_payout_script: None,
            },
        ))));
    }
    Ok(StepOutput::done())
}

/// Answers the availability request with the maker's contribution.
pub(super) fn sends_availability_response(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    Ok(StepOutput::send(TradeMessage::AvailabilityResponse(
        AvailabilityResponse {
            trade_id: ctx.trade.id.clone(),
            result: AvailabilityResult::Available,
            maker_multisig_pubkey: ctx.model.my_multisig_pubkey,
            maker_payout_script: ctx.model.my_payout_script.clone(),
        },
    )))
}

/// Validates and stores the taker's contribution, and checks both parties
/// computed the same contract hash before anything gets built.
pub(super) fn processes_deposit_tx_request(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::DepositTxRequest(request) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "DepositTxRequest".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let request = request.clone();

    // Spend-type check runs before anything else; a non-conforming taker
    // input must fail the trade before any signature is requested.
    for input in &request.taker_inputs {
        if !contract::is_segwit_v0_spend(&input.script_pubkey) {
            return Err(crate::protocol::error::ContractError::UnsupportedSpendType(
                input.outpoint,
            )
            .into());
        }
    }
    if request.taker_inputs.is_empty() {
        return Err(StepError::validation("taker contributed no inputs"));
    }

    let offer = &ctx.trade.offer;
    let i_am_buyer = ctx.trade.role.is_buyer();
    let my_pubkey = ctx
        .model
        .my_multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("own multisig pubkey"))?;
    let my_payout = ctx
        .model
        .my_payout_script
        .clone()
        .ok_or(ProtocolError::MissingPeerData("own payout script"))?;

    let (buyer_key, seller_key) = if i_am_buyer {
        (my_pubkey, request.taker_multisig_pubkey)
    } else {
        (request.taker_multisig_pubkey, my_pubkey)
    };
    let (buyer_payout, seller_payout) = if i_am_buyer {
        (my_payout, request.taker_payout_script.clone())
    } else {
        (request.taker_payout_script.clone(), my_payout)
    };

    let contract = TradeContract {
        trade_id: ctx.trade.id.clone(),
        amount: offer.amount,
        price: offer.price,
        buyer_security_deposit: offer.buyer_security_deposit,
        seller_security_deposit: offer.seller_security_deposit,
        payment_method_id: offer.payment_method_id.clone(),
        maker_is_buyer: i_am_buyer,
        buyer_multisig_pubkey: buyer_key,
        seller_multisig_pubkey: seller_key,
        arbitrator_pubkey: ctx.arbitrator,
        buyer_payout_script: buyer_payout,
        seller_payout_script: seller_payout,
    };
    let our_hash = contract.contract_hash()?;
    if our_hash != request.contract_hash {
        return Err(ProtocolError::ContractHashMismatch.into());
    }

    ctx.model.peer.multisig_pubkey = Some(request.taker_multisig_pubkey);
    ctx.model.peer.payout_script = Some(request.taker_payout_script);
    ctx.model.peer.raw_inputs = request.taker_inputs;
    ctx.model.peer.change_script = Some(request.taker_change_script);
    ctx.model.peer.contract_hash = Some(request.contract_hash);
    ctx.model.contract_hash = Some(our_hash);
    ctx.model.contract = Some(contract);
    ctx.model.verified.peer_contribution = true;
    Ok(StepOutput::done())
}

/// Builds the combined unsigned deposit transaction. Built once per trade:
/// a re-dispatch reuses the existing construction, and nothing is ever
/// rebuilt after broadcast.
pub(super) fn creates_unsigned_deposit_tx(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    if ctx.model.deposit_tx.is_some() || ctx.model.prepared_deposit_tx.is_some() {
        return Ok(StepOutput::done());
    }
    // The key committed into the contract must match the wallet's
    // reservation record; a mismatch means external state corruption.
    let entry = ctx
        .wallet
        .multisig_key_entry(&ctx.trade.id)?
        .ok_or(ProtocolError::MultisigKeyMismatch)?;
    if Some(entry.pubkey) != ctx.model.my_multisig_pubkey {
        return Err(ProtocolError::MultisigKeyMismatch.into());
    }

    let contract = ctx.model.contract()?.clone();
    let owed = super::own_escrow_share(ctx)?;
    ctx.wallet.lock_escrow_amount(&ctx.trade.id, owed)?;

    let maker_side = PartyInputs {
        inputs: ctx.model.my_inputs.clone(),
        change_script: ctx
            .model
            .my_change_script
            .clone()
            .ok_or(ProtocolError::MissingPeerData("own change script"))?,
    };
    let taker_side = PartyInputs {
        inputs: ctx.model.peer.raw_inputs.clone(),
        change_script: ctx
            .model
            .peer
            .change_script
            .clone()
            .ok_or(ProtocolError::MissingPeerData("taker change script"))?,
    };
    let tx = contract::create_deposit_tx(
        &contract,
        &maker_side,
        &taker_side,
        Amount::from_sat(ctx.config.deposit_tx_fee),
    )?;
    ctx.model.prepared_deposit_tx = Some(tx);
    Ok(StepOutput::done())
}

/// Hands the unsigned deposit transaction to the taker for co-signing.
pub(super) fn sends_deposit_tx_response(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    Ok(StepOutput::send(TradeMessage::DepositTxResponse(
        DepositTxResponse {
            trade_id: ctx.trade.id.clone(),
            deposit_tx: ctx
                .model
                .prepared_deposit_tx
                .clone()
                .ok_or(ProtocolError::MissingPeerData("prepared deposit tx"))?,
            maker_inputs: ctx.model.my_inputs.clone(),
        },
    )))
}

/// Verifies and applies the taker's witnesses to the prepared deposit tx.
pub(super) fn applies_taker_witnesses(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::DepositTxSignature(signature) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "DepositTxSignature".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let signature = signature.clone();
    if ctx.model.deposit_tx.is_some() {
        return Ok(StepOutput::done());
    }
    let mut tx = ctx
        .model
        .prepared_deposit_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("prepared deposit tx"))?;

    let mut signed = 0usize;
    for input_witness in signature.witnesses {
        let belongs_to_taker = ctx
            .model
            .peer
            .raw_inputs
            .iter()
            .any(|raw| raw.outpoint == input_witness.outpoint);
        if !belongs_to_taker {
            return Err(StepError::validation(
                "taker sent a witness for an input it did not contribute",
            ));
        }
        if input_witness.witness.is_empty() {
            return Err(StepError::validation("taker sent an empty witness"));
        }
        let index = tx
            .input
            .iter()
            .position(|txin| txin.previous_output == input_witness.outpoint)
            .ok_or_else(|| {
                StepError::validation("taker witness references an unknown deposit input")
            })?;
        tx.input[index].witness = input_witness.witness;
        signed += 1;
    }
    if signed != ctx.model.peer.raw_inputs.len() {
        return Err(StepError::validation(format!(
            "taker signed {signed} of {} contributed inputs",
            ctx.model.peer.raw_inputs.len()
        )));
    }
    ctx.model.prepared_deposit_tx = Some(tx);
    Ok(StepOutput::done())
}

/// Signs the maker's own inputs of the deposit transaction.
pub(super) fn signs_deposit_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    if ctx.model.deposit_tx.is_some() {
        return Ok(StepOutput::done());
    }
    let mut tx = ctx
        .model
        .prepared_deposit_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("prepared deposit tx"))?;
    ctx.wallet.sign_funding_inputs(&mut tx, &ctx.model.my_inputs)?;
    ctx.model.prepared_deposit_tx = Some(tx);
    Ok(StepOutput::done())
}

/// Broadcasts the fully signed deposit transaction. On a re-dispatch after
/// the broadcast already happened, only the notification is re-sent.
pub(super) fn broadcasts_deposit_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    if let Some(published) = &ctx.model.deposit_tx {
        return Ok(StepOutput::send(TradeMessage::DepositTxPublished(
            DepositTxPublished {
                trade_id: ctx.trade.id.clone(),
                deposit_tx: published.clone(),
            },
        )));
    }
    let tx = ctx
        .model
        .prepared_deposit_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("prepared deposit tx"))?;
    if tx.input.iter().any(|txin| txin.witness.is_empty()) {
        return Err(StepError::validation(
            "deposit tx still has unsigned inputs",
        ));
    }
    let txid = ctx.wallet.broadcast(&tx)?;
    ctx.trade.deposit_txid = Some(txid);
    ctx.model.deposit_tx = Some(tx.clone());
    log::info!("[{}] Deposit tx {} broadcast", ctx.trade.id, txid);
    Ok(StepOutput::send(TradeMessage::DepositTxPublished(
        DepositTxPublished {
            trade_id: ctx.trade.id.clone(),
            deposit_tx: tx,
        },
    )))
}

/// Builds the time-locked delayed payout transaction once the escrow is
/// confirmed. The lock time sits one payment period plus the configured
/// grace window past the confirmation.
pub(super) fn creates_delayed_payout_tx(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    if ctx.model.delayed_payout_tx.is_some() {
        return Ok(StepOutput::done());
    }
    let (contract, escrow_outpoint, _) = contract_and_escrow(ctx)?;
    let confirm_time = ctx
        .trade
        .deposit_confirm_time
        .ok_or(ProtocolError::MissingPeerData("deposit confirmation time"))?;
    let trade_period = ctx
        .methods
        .max_trade_period(&contract.payment_method_id)
        .ok_or_else(|| {
            StepError::validation(format!(
                "unknown payment method {}",
                contract.payment_method_id
            ))
        })?;
    let lock_secs = confirm_time
        .checked_add(trade_period.as_secs())
        .and_then(|t| t.checked_add(ctx.config.dispute_grace_period))
        .ok_or_else(|| StepError::validation("delayed payout lock time overflow"))?;
    let lock_time = bitcoin::absolute::LockTime::from_time(
        u32::try_from(lock_secs)
            .map_err(|_| StepError::validation("delayed payout lock time overflow"))?,
    )
    .map_err(crate::protocol::error::ContractError::from)?;

    let tx = contract::create_delayed_payout_tx(
        &contract,
        escrow_outpoint,
        Amount::from_sat(ctx.config.payout_tx_fee),
        lock_time,
    )?;
    ctx.model.delayed_payout_tx = Some(tx);
    Ok(StepOutput::done())
}

/// Signs the delayed payout and asks the taker for the countersignature.
pub(super) fn signs_delayed_payout_tx(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let (contract, _, escrow_value) = contract_and_escrow(ctx)?;
    let tx = ctx
        .model
        .delayed_payout_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("delayed payout tx"))?;
    let my_sig = ctx.wallet.sign_multisig_input(
        &ctx.trade.id,
        &tx,
        0,
        &contract.redeemscript(),
        escrow_value,
    )?;
    ctx.model.my_delayed_payout_sig = Some(my_sig);
    Ok(StepOutput::send(
        TradeMessage::DelayedPayoutTxSignatureRequest(DelayedPayoutTxSignatureRequest {
            trade_id: ctx.trade.id.clone(),
            delayed_payout_tx: tx,
            signature: my_sig,
        }),
    ))
}

/// Verifies the taker's delayed payout countersignature. Skipped when a
/// prior run already recorded the verification.
pub(super) fn verifies_delayed_payout_sig(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::DelayedPayoutTxSignatureResponse(response) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "DelayedPayoutTxSignatureResponse".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let response = response.clone();
    let (contract, _, escrow_value) = contract_and_escrow(ctx)?;
    let tx = ctx
        .model
        .delayed_payout_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("delayed payout tx"))?;

    if !ctx.model.verified.delayed_payout_sig {
        let peer_pubkey = ctx
            .model
            .peer
            .multisig_pubkey
            .ok_or(ProtocolError::MissingPeerData("taker multisig pubkey"))?;
        contract::verify_multisig_signature(
            &tx,
            0,
            &contract.redeemscript(),
            escrow_value,
            &response.signature,
            &peer_pubkey,
        )?;
        ctx.model.verified.delayed_payout_sig = true;
    }
    ctx.model.peer.delayed_payout_sig = Some(response.signature);
    Ok(StepOutput::done())
}

/// Stores the fully signed delayed payout as this party's safety net.
pub(super) fn finalizes_delayed_payout_tx(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let (contract, _, _) = contract_and_escrow(ctx)?;
    let tx = ctx
        .model
        .delayed_payout_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("delayed payout tx"))?;
    if !tx.input[0].witness.is_empty() {
        return Ok(StepOutput::done());
    }
    let my_pubkey = ctx
        .model
        .my_multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("own multisig pubkey"))?;
    let my_sig = ctx
        .model
        .my_delayed_payout_sig
        .ok_or(ProtocolError::MissingPeerData("own delayed payout sig"))?;
    let peer_pubkey = ctx
        .model
        .peer
        .multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("taker multisig pubkey"))?;
    let peer_sig = ctx
        .model
        .peer
        .delayed_payout_sig
        .ok_or(ProtocolError::MissingPeerData("taker delayed payout sig"))?;
    let finalized = contract::finalize_multisig_spend(
        tx,
        &contract.redeemscript(),
        &[(my_pubkey, my_sig), (peer_pubkey, peer_sig)],
    )?;
    ctx.model.delayed_payout_tx = Some(finalized);
    log::info!("[{}] Delayed payout safety net fully signed", ctx.trade.id);
    Ok(StepOutput::done())
}
