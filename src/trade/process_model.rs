//! Per-trade scratch state surviving restarts.
//!
//! The [`ProcessModel`] holds everything a trade accumulates between
//! protocol steps: own keys and inputs, the counterparty's contributed
//! data, and the escrow transactions as they take shape. It is checkpointed
//! to the trade store after every completed task, so a restarted process
//! re-enters the protocol at the last committed step instead of rebuilding
//! (and possibly double-broadcasting) anything.

use bitcoin::{
    ecdsa::Signature, hashes::sha256::Hash, PublicKey, ScriptBuf, Transaction,
};
use serde::{Deserialize, Serialize};

use crate::protocol::{contract::TradeContract, messages::RawTransactionInput};

/// The counterparty's contributed protocol data, as received over the
/// network. Fields fill in as phase-appropriate messages arrive; the state
/// machine refuses stale replays before anything here is overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPeer {
    /// Peer's multisig public key.
    pub multisig_pubkey: Option<PublicKey>,
    /// Script the peer's escrow share pays out to.
    pub payout_script: Option<ScriptBuf>,
    /// Inputs the peer contributed to the deposit transaction.
    pub raw_inputs: Vec<RawTransactionInput>,
    /// Peer's change script.
    pub change_script: Option<ScriptBuf>,
    /// Contract hash the peer committed to.
    pub contract_hash: Option<Hash>,
    /// Peer's signature over the delayed payout transaction.
    pub delayed_payout_sig: Option<Signature>,
    /// Peer's signature over the cooperative payout transaction.
    pub payout_sig: Option<Signature>,
    /// Payment reference the buyer attached to its payment-sent notice.
    pub payment_reference: Option<String>,
}

/// Expensive verifications already performed and recorded.
///
/// On a chain re-dispatch after a transient failure, cheap structural
/// checks run again but verifications flagged here are trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedFlags {
    /// Peer's deposit-input spend types and contract hash checked out.
    pub peer_contribution: bool,
    /// Peer's delayed payout signature verified against the escrow.
    pub delayed_payout_sig: bool,
    /// Peer's cooperative payout signature verified against the escrow.
    pub payout_sig: bool,
}

/// Mutable per-trade scratch state. Exclusively owned by its trade;
/// mutated only by tasks of that trade's currently running chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModel {
    /// This party's multisig public key, as reserved in the wallet.
    pub my_multisig_pubkey: Option<PublicKey>,
    /// Script this party's escrow share pays out to.
    pub my_payout_script: Option<ScriptBuf>,
    /// Inputs this party contributes to the deposit transaction.
    pub my_inputs: Vec<RawTransactionInput>,
    /// This party's change script.
    pub my_change_script: Option<ScriptBuf>,
    /// The fully negotiated contract, once both contributions are known.
    pub contract: Option<TradeContract>,
    /// Hash of the negotiated contract.
    pub contract_hash: Option<Hash>,
    /// The combined deposit transaction before broadcast.
    pub prepared_deposit_tx: Option<Transaction>,
    /// The deposit transaction as broadcast. Never rebuilt once set.
    pub deposit_tx: Option<Transaction>,
    /// The delayed payout transaction (unsigned or fully signed).
    pub delayed_payout_tx: Option<Transaction>,
    /// This party's signature over the delayed payout transaction.
    pub my_delayed_payout_sig: Option<Signature>,
    /// The cooperative payout transaction.
    pub payout_tx: Option<Transaction>,
    /// This party's signature over the cooperative payout transaction.
    pub my_payout_sig: Option<Signature>,
    /// The counterparty's contributed data.
    pub peer: TradingPeer,
    /// Verifications already recorded (see retry policy).
    pub verified: VerifiedFlags,
    /// Evidence strings attached when a dispute was opened.
    pub dispute_evidence: Vec<String>,
}

impl ProcessModel {
    /// The negotiated contract, or an error naming the missing piece.
    pub fn contract(&self) -> Result<&TradeContract, crate::error::ProtocolError> {
        self.contract
            .as_ref()
            .ok_or(crate::error::ProtocolError::MissingPeerData("contract"))
    }
}
