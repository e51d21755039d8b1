//! Seller-side payment and payout steps, shared by maker-as-seller and
//! taker-as-seller.

use bitcoin::Amount;

use crate::{
    error::ProtocolError,
    protocol::{
        contract,
        messages::{PaymentReceivedMsg, TradeMessage},
    },
};

use super::{contract_and_escrow, event_message, StepError, StepOutput, TradeContext};

/// Records the buyer's payment-sent notice.
pub(super) fn processes_payment_sent(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::PaymentSent(sent) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "PaymentSent".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let reference = sent.payment_reference.clone();
    ctx.model.peer.payment_reference = reference;
    log::info!("[{}] Buyer reports payment initiated", ctx.trade.id);
    Ok(StepOutput::done())
}

/// Builds the cooperative payout transaction. Built once; a re-dispatch
/// reuses it.
pub(super) fn creates_payout_tx(ctx: &mut TradeContext) -> Result<StepOutput, StepError> {
    if ctx.model.payout_tx.is_some() {
        return Ok(StepOutput::done());
    }
    let (contract_terms, escrow_outpoint, _) = contract_and_escrow(ctx)?;
    let tx = contract::create_payout_tx(
        &contract_terms,
        escrow_outpoint,
        Amount::from_sat(ctx.config.payout_tx_fee),
    )?;
    ctx.model.payout_tx = Some(tx);
    Ok(StepOutput::done())
}

/// Signs the payout, releasing the seller's half of the escrow, and sends
/// it to the buyer together with the payment confirmation.
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
    Ok(StepOutput::send(TradeMessage::PaymentReceived(
        PaymentReceivedMsg {
            trade_id: ctx.trade.id.clone(),
            payout_tx: tx,
            signature: my_sig,
        },
    )))
}

/// Confirms the broadcast payout is the one this party authorized, then
/// releases the wallet reservations.
pub(super) fn processes_payout_published(
    ctx: &mut TradeContext,
) -> Result<StepOutput, StepError> {
    let message = event_message(ctx)?;
    let TradeMessage::PayoutTxPublished(published) = message else {
        return Err(ProtocolError::WrongMessage {
            expected: "PayoutTxPublished".to_string(),
            received: message.to_string(),
        }
        .into());
    };
    let published = published.clone();
    let authorized = ctx
        .model
        .payout_tx
        .as_ref()
        .ok_or(ProtocolError::MissingPeerData("payout tx"))?;
    // Witnesses don't affect the txid, so the authorized unsigned payout
    // pins the broadcast one.
    if published.payout_tx.compute_txid() != authorized.compute_txid() {
        return Err(StepError::validation(
            "buyer broadcast a different payout transaction than authorized",
        ));
    }
    ctx.model.payout_tx = Some(published.payout_tx);
    ctx.wallet.release_trade_keys(&ctx.trade.id)?;
    log::info!("[{}] Payout observed, trade complete", ctx.trade.id);
    Ok(StepOutput::done())
}
