//! Dispute handoff types.
//!
//! Mediation itself happens outside this crate. When a party escalates, the
//! engine assembles a [`DisputePayload`] (the contract rendered as JSON,
//! its hash, the signed delayed payout transaction and any evidence) and
//! hands it to the mediator. The mediator's answer comes back as a
//! [`DisputeResolution`] carrying a signed release, which re-enters the
//! engine at the broadcast step.

use bitcoin::{hashes::sha256::Hash, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

use super::{process_model::ProcessModel, Trade, TradeRole};

/// Everything the mediator needs to resolve one dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputePayload {
    /// Trade under dispute.
    pub trade_id: String,
    /// Which side opened the dispute.
    pub opener_role: TradeRole,
    /// The full contract terms, rendered human-readable.
    pub contract_json: String,
    /// Hash both parties committed to.
    pub contract_hash: Hash,
    /// The co-signed delayed payout, when the trade got that far.
    pub delayed_payout_tx: Option<Transaction>,
    /// Free-form evidence supplied by the opener.
    pub evidence: Vec<String>,
}

/// The mediator's resolution: a fully signed transaction releasing the
/// escrow per the decided split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResolution {
    /// Trade the resolution applies to.
    pub trade_id: String,
    /// The signed release, ready for broadcast.
    pub signed_payout_tx: Transaction,
}

/// Assembles the mediator payload from a trade's checkpointed state.
pub fn build_payload(trade: &Trade, model: &ProcessModel) -> Result<DisputePayload, ProtocolError> {
    let contract = model.contract()?;
    Ok(DisputePayload {
        trade_id: trade.id.clone(),
        opener_role: trade.role,
        contract_json: contract
            .as_json()
            .map_err(ProtocolError::Contract)?,
        contract_hash: contract.contract_hash().map_err(ProtocolError::Contract)?,
        delayed_payout_tx: model.delayed_payout_tx.clone(),
        evidence: model.dispute_evidence.clone(),
    })
}
