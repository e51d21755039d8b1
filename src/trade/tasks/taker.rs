//! Taker-side protocol steps: availability handshake, deposit contribution,
//! deposit verification and the delayed payout countersignature.

use crate::{
    error::ProtocolError,
    protocol::{
        contract::{self, TradeContract},
        messages::{
            AvailabilityRequest, AvailabilityResult, DelayedPayoutTxSignatureResponse,
            DepositTxRequest, DepositTxSignature, InputWitness, TradeMessage,
        },
    },
};

use super::{contract_and_escrow, event_message, StepError, StepOutput, TradeContext};

/// Re-checks the taken offer against the payment catalog before anything
/// is sent to the maker.
pub(super) fn validates_offer(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    ctx.trade
        .offer
        .validate(ctx.methods)
        .map_err(|e| StepError::validation(format!("offer validation failed: {e}")))?;
    Ok(StepOutput::done())
}

/// Opens the trade with an availability request mirroring the offer terms.
pub(super) fn sends_availability_request(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let offer = &ctx.trade.offer;
    Ok(StepOutput::send(TradeMessage::AvailabilityRequest(
        AvailabilityRequest {
            trade_id: ctx.trade.id.clone(),
            amount: offer.amount,
            price: offer.price,
            payment_method_id: offer.payment_method_id.clone(),
        },
    )))
}

/// Checks the maker's availability answer and stores its contribution.
pub(super) fn processes_availability_response(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::AvailabilityResponse(response) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "AvailabilityResponse".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    if response.result != AvailabilityResult::Available {
        return Err(StepError::validation(format!(
            "offer not available: {:?}",
            response.result
        )));
    }
    let pubkey = response
        .maker_multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("maker multisig pubkey"))?;
    let payout_script = response
        .maker_payout_script
        .clone()
        .ok_or(ProtocolError::MissingPeerData("maker payout script"))?;
    ctx.model.peer.multisig_pubkey = Some(pubkey);
    ctx.model.peer.payout_script = Some(payout_script);
    Ok(StepOutput::done())
}

/// Assembles the full contract from both parties' contributions and
/// commits to its hash.
pub(super) fn creates_contract(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    if ctx.model.contract.is_some() {
        // Terms are committed once; a re-dispatch must not renegotiate.
        return Ok(StepOutput::done());
    }
    let offer = &ctx.trade.offer;
    let my_pubkey = ctx
        .model
        .my_multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("own multisig pubkey"))?;
    let my_payout = ctx
        .model
        .my_payout_script
        .clone()
        .ok_or(ProtocolError::MissingPeerData("own payout script"))?;
    let peer_pubkey = ctx
        .model
        .peer
        .multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("maker multisig pubkey"))?;
    let peer_payout = ctx
        .model
        .peer
        .payout_script
        .clone()
        .ok_or(ProtocolError::MissingPeerData("maker payout script"))?;

    let i_am_buyer = ctx.trade.role.is_buyer();
    let (buyer_key, seller_key) = if i_am_buyer {
        (my_pubkey, peer_pubkey)
    } else {
        (peer_pubkey, my_pubkey)
    };
    let (buyer_payout, seller_payout) = if i_am_buyer {
        (my_payout, peer_payout)
    } else {
        (peer_payout, my_payout)
    };

    let contract = TradeContract {
        trade_id: ctx.trade.id.clone(),
        amount: offer.amount,
        price: offer.price,
        buyer_security_deposit: offer.buyer_security_deposit,
        seller_security_deposit: offer.seller_security_deposit,
        payment_method_id: offer.payment_method_id.clone(),
        maker_is_buyer: !i_am_buyer,
        buyer_multisig_pubkey: buyer_key,
        seller_multisig_pubkey: seller_key,
        arbitrator_pubkey: ctx.arbitrator,
        buyer_payout_script: buyer_payout,
        seller_payout_script: seller_payout,
    };
    ctx.model.contract_hash = Some(contract.contract_hash()?);
    ctx.model.contract = Some(contract);
    Ok(StepOutput::done())
}

/// Hands the taker's contribution and contract commitment to the maker.
pub(super) fn sends_deposit_tx_request(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let contract_hash = ctx
        .model
        .contract_hash
        .ok_or(ProtocolError::MissingPeerData("contract hash"))?;
    Ok(StepOutput::send(TradeMessage::DepositTxRequest(
        DepositTxRequest {
            trade_id: ctx.trade.id.clone(),
            taker_multisig_pubkey: ctx
                .model
                .my_multisig_pubkey
                .ok_or(ProtocolError::MissingPeerData("own multisig pubkey"))?,
            taker_payout_script: ctx
                .model
                .my_payout_script
                .clone()
                .ok_or(ProtocolError::MissingPeerData("own payout script"))?,
            taker_inputs: ctx.model.my_inputs.clone(),
            taker_change_script: ctx
                .model
                .my_change_script
                .clone()
                .ok_or(ProtocolError::MissingPeerData("own change script"))?,
            contract_hash,
        },
    )))
}

/// Verifies the maker-built deposit transaction against the agreed
/// contract before anything gets signed.
pub(super) fn verifies_deposit_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::DepositTxResponse(response) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "DepositTxResponse".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let response = response.clone();
    if ctx.model.deposit_tx.is_some() {
        // Already broadcast; never accept a replacement construction.
        return Ok(StepOutput::done());
    }
    // Cheap cross-check re-runs on every dispatch: the key we committed to
    // the contract must still be the wallet's reserved one.
    let entry = ctx
        .wallet
        .multisig_key_entry(&ctx.trade.id)?
        .ok_or(ProtocolError::MultisigKeyMismatch)?;
    if Some(entry.pubkey) != ctx.model.my_multisig_pubkey {
        return Err(ProtocolError::MultisigKeyMismatch.into());
    }

    let contract = ctx.model.contract()?.clone();
    contract::validate_deposit_tx(
        &response.deposit_tx,
        &contract,
        &ctx.model.my_inputs,
        &response.maker_inputs,
    )?;
    ctx.model.peer.raw_inputs = response.maker_inputs;
    ctx.model.verified.peer_contribution = true;
    ctx.model.prepared_deposit_tx = Some(response.deposit_tx);
    Ok(StepOutput::done())
}

/// Signs the taker's own inputs and sends the witnesses to the maker.
pub(super) fn signs_deposit_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let mut tx = ctx
        .model
        .prepared_deposit_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("prepared deposit tx"))?;
    ctx.wallet.sign_funding_inputs(&mut tx, &ctx.model.my_inputs)?;

    let mut witnesses = Vec::new();
    for raw in &ctx.model.my_inputs {
        let index = tx
            .input
            .iter()
            .position(|txin| txin.previous_output == raw.outpoint)
            .ok_or(ProtocolError::MissingPeerData("own input in deposit tx"))?;
        witnesses.push(InputWitness {
            outpoint: raw.outpoint,
            witness: tx.input[index].witness.clone(),
        });
    }
    ctx.model.prepared_deposit_tx = Some(tx);
    Ok(StepOutput::send(TradeMessage::DepositTxSignature(
        DepositTxSignature {
            trade_id: ctx.trade.id.clone(),
            witnesses,
        },
    )))
}

/// Accepts the broadcast deposit transaction after checking it is the one
/// we co-signed.
pub(super) fn commits_deposit_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::DepositTxPublished(published) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "DepositTxPublished".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let published = published.clone();
    let prepared = ctx
        .model
        .prepared_deposit_tx
        .as_ref()
        .ok_or(ProtocolError::MissingPeerData("prepared deposit tx"))?;
    // Txids ignore witnesses, so the unsigned construction pins the final tx.
    if published.deposit_tx.compute_txid() != prepared.compute_txid() {
        return Err(StepError::validation(
            "maker broadcast a different deposit transaction than agreed",
        ));
    }
    let txid = published.deposit_tx.compute_txid();
    ctx.trade.deposit_txid = Some(txid);
    ctx.model.deposit_tx = Some(published.deposit_tx);
    ctx.wallet
        .lock_escrow_amount(&ctx.trade.id, super::own_escrow_share(ctx)?)?;
    log::info!("[{}] Deposit tx {} committed", ctx.trade.id, txid);
    Ok(StepOutput::done())
}

/// Verifies the maker-built delayed payout transaction (outputs, lock time
/// and the maker's signature) before countersigning. Any mismatch is fatal:
/// a party must not sign a payout it cannot independently verify.
pub(super) fn verifies_delayed_payout_tx(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::DelayedPayoutTxSignatureRequest(request) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "DelayedPayoutTxSignatureRequest".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let request = request.clone();
    let (contract, escrow_outpoint, escrow_value) = contract_and_escrow(ctx)?;
    let confirm_time = ctx
        .trade
        .deposit_confirm_time
        .ok_or(ProtocolError::MissingPeerData("deposit confirmation time"))?;

    contract::validate_delayed_payout_tx(
        &request.delayed_payout_tx,
        &contract,
        escrow_outpoint,
        bitcoin::Amount::from_sat(ctx.config.payout_tx_fee),
        confirm_time,
    )?;

    if !ctx.model.verified.delayed_payout_sig {
        let peer_pubkey = ctx
            .model
            .peer
            .multisig_pubkey
            .ok_or(ProtocolError::MissingPeerData("maker multisig pubkey"))?;
        contract::verify_multisig_signature(
            &request.delayed_payout_tx,
            0,
            &contract.redeemscript(),
            escrow_value,
            &request.signature,
            &peer_pubkey,
        )?;
        ctx.model.verified.delayed_payout_sig = true;
    }
    ctx.model.peer.delayed_payout_sig = Some(request.signature);
    ctx.model.delayed_payout_tx = Some(request.delayed_payout_tx);
    Ok(StepOutput::done())
}

/// Countersigns the delayed payout and keeps a fully signed copy as this
/// party's safety net.
pub(super) fn signs_delayed_payout_tx(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let (contract, _, escrow_value) = contract_and_escrow(ctx)?;
    let tx = ctx
        .model
        .delayed_payout_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("delayed payout tx"))?;
    let redeemscript = contract.redeemscript();
    let my_sig =
        ctx.wallet
            .sign_multisig_input(&ctx.trade.id, &tx, 0, &redeemscript, escrow_value)?;
    ctx.model.my_delayed_payout_sig = Some(my_sig);

    // Both signatures are in hand; keep the spendable safety net around.
    if let (Some(my_pubkey), Some(peer_pubkey), Some(peer_sig)) = (
        ctx.model.my_multisig_pubkey,
        ctx.model.peer.multisig_pubkey,
        ctx.model.peer.delayed_payout_sig,
    ) {
        let finalized = contract::finalize_multisig_spend(
            tx,
            &redeemscript,
            &[(my_pubkey, my_sig), (peer_pubkey, peer_sig)],
        )?;
        ctx.model.delayed_payout_tx = Some(finalized);
    }

    Ok(StepOutput::send(
        TradeMessage::DelayedPayoutTxSignatureResponse(DelayedPayoutTxSignatureResponse {
            trade_id: ctx.trade.id.clone(),
            signature: my_sig,
        }),
    ))
}
