//! Buyer-side payment and payout steps, shared by maker-as-buyer and
//! taker-as-buyer.

use bitcoin::Amount;

use crate::{
    error::ProtocolError,
    protocol::{
        contract,
        messages::{PaymentSentMsg, PayoutTxPublished, TradeMessage},
    },
    trade::TradeState,
};

use super::{contract_and_escrow, event_message, StepError, StepOutput, TradeContext};

/// Notifies the seller that the payment leg was initiated. Refused until
/// the delayed payout safety net is fully co-signed: before that, walking
/// away from the trade could lock the escrow forever.
pub(super) fn sends_payment_sent(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    if ctx.model.delayed_payout_tx.is_none() || !ctx.model.verified.delayed_payout_sig {
        return Err(StepError::transient(
            "delayed payout safety net not in place yet",
        ));
    }
    Ok(StepOutput::send(TradeMessage::PaymentSent(PaymentSentMsg {
        trade_id: ctx.trade.id.clone(),
        payment_reference: None,
    })))
}

/// Verifies the payout transaction and the seller's signature, and records
/// the payment as received.
pub(super) fn processes_payment_received(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::PaymentReceived(received) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "PaymentReceived".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let received = received.clone();
    let (contract_terms, escrow_outpoint, escrow_value) = contract_and_escrow(ctx)?;

    contract::validate_payout_tx(
        &received.payout_tx,
        &contract_terms,
        escrow_outpoint,
        Amount::from_sat(ctx.config.payout_tx_fee),
    )?;

    if !ctx.model.verified.payout_sig {
        let seller_pubkey = ctx
            .model
            .peer
            .multisig_pubkey
            .ok_or(ProtocolError::MissingPeerData("seller multisig pubkey"))?;
        contract::verify_multisig_signature(
            &received.payout_tx,
            0,
            &contract_terms.redeemscript(),
            escrow_value,
            &received.signature,
            &seller_pubkey,
        )?;
        ctx.model.verified.payout_sig = true;
    }
    ctx.model.peer.payout_sig = Some(received.signature);
    ctx.model.payout_tx = Some(received.payout_tx);
    ctx.trade.advance_state(TradeState::PaymentReceived);
    Ok(StepOutput::done())
}

/// Co-signs the cooperative payout.
pub(super) fn signs_payout_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let (contract_terms, _, escrow_value) = contract_and_escrow(ctx)?;
    let tx = ctx
        .model
        .payout_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("payout tx"))?;
    let my_sig = ctx.wallet.sign_multisig_input(
        &ctx.trade.id,
        &tx,
        0,
        &contract_terms.redeemscript(),
        escrow_value,
    )?;
    ctx.model.my_payout_sig = Some(my_sig);
    Ok(StepOutput::done())
}

/// Finalizes and broadcasts the payout, then notifies the seller. Both
/// signatures are in hand at this point; broadcast is the irreversible
/// step and therefore comes last.
pub(super) fn broadcasts_payout_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let (contract_terms, _, _) = contract_and_escrow(ctx)?;
    let tx = ctx
        .model
        .payout_tx
        .clone()
        .ok_or(ProtocolError::MissingPeerData("payout tx"))?;
    let my_pubkey = ctx
        .model
        .my_multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("own multisig pubkey"))?;
    let my_sig = ctx
        .model
        .my_payout_sig
        .ok_or(ProtocolError::MissingPeerData("own payout sig"))?;
    let seller_pubkey = ctx
        .model
        .peer
        .multisig_pubkey
        .ok_or(ProtocolError::MissingPeerData("seller multisig pubkey"))?;
    let seller_sig = ctx
        .model
        .peer
        .payout_sig
        .ok_or(ProtocolError::MissingPeerData("seller payout sig"))?;

    let finalized = if tx.input[0].witness.is_empty() {
        contract::finalize_multisig_spend(
            tx,
            &contract_terms.redeemscript(),
            &[(my_pubkey, my_sig), (seller_pubkey, seller_sig)],
        )?
    } else {
        tx
    };
    let txid = ctx.wallet.broadcast(&finalized)?;
    ctx.model.payout_tx = Some(finalized.clone());
    ctx.wallet.release_trade_keys(&ctx.trade.id)?;
    log::info!("[{}] Payout tx {} broadcast", ctx.trade.id, txid);
    Ok(StepOutput::send(TradeMessage::PayoutTxPublished(
        PayoutTxPublished {
            trade_id: ctx.trade.id.clone(),
            payout_tx: finalized,
        },
    )))
}
