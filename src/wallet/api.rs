//! The Wallet API.
//!
//! The boundary trait the protocol engine drives all wallet operations
//! through: multisig key reservation, funding input selection, signing and
//! broadcast. Implementations own the actual keys and node connection
//! (typically over RPC) and are responsible for their own synchronization;
//! the engine calls them from concurrent trade chains.

use bitcoin::{ecdsa::Signature, Amount, PublicKey, Script, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};

use super::error::WalletError;
use crate::protocol::messages::RawTransactionInput;

/// Purpose a wallet key/address was reserved for within one trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyContext {
    /// Key participating in the escrow multisig.
    MultiSig,
    /// Address reserved for the trade's payout.
    ReservedForTrade,
}

/// One wallet-side key reservation record.
///
/// The engine cross-checks the multisig pubkey it is about to build with
/// against this record before constructing the deposit transaction; a
/// mismatch means external state corruption and is fatal for the trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Trade the reservation belongs to.
    pub trade_id: String,
    /// What the key was reserved for.
    pub context: KeyContext,
    /// The reserved public key.
    pub pubkey: PublicKey,
    /// Amount the wallet considers locked under this reservation.
    pub coin_locked: Amount,
}

/// Inputs the wallet selected to fund one party's escrow contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingSelection {
    /// Selected spendable inputs; their sum covers the requested target.
    pub inputs: Vec<RawTransactionInput>,
    /// Script any change should be returned to.
    pub change_script: ScriptBuf,
}

/// Wallet operations the trade protocol engine depends on.
///
/// Implementations are internally synchronized; methods take `&self` and
/// may be called from chains of different trades concurrently. Key material
/// for a trade is fixed once reserved: `reserve_multisig_key` must return
/// the already-reserved key on repeated calls for the same trade.
pub trait WalletApi: Send + Sync {
    /// Reserves (or returns the already reserved) multisig key for a trade.
    fn reserve_multisig_key(&self, trade_id: &str) -> Result<PublicKey, WalletError>;

    /// The reservation record for a trade's multisig key, if any.
    fn multisig_key_entry(&self, trade_id: &str) -> Result<Option<AddressEntry>, WalletError>;

    /// Records the amount locked into the escrow under a trade's reservation.
    fn lock_escrow_amount(&self, trade_id: &str, amount: Amount) -> Result<(), WalletError>;

    /// Releases all reservations of a finished trade.
    fn release_trade_keys(&self, trade_id: &str) -> Result<(), WalletError>;

    /// Selects spendable inputs summing to at least `target`.
    fn select_funding_inputs(&self, target: Amount) -> Result<FundingSelection, WalletError>;

    /// A fresh script pubkey of this wallet (payout and change outputs).
    fn fresh_script_pubkey(&self) -> Result<ScriptBuf, WalletError>;

    /// Signs the wallet's own funding inputs of `tx` in place.
    fn sign_funding_inputs(
        &self,
        tx: &mut Transaction,
        own_inputs: &[RawTransactionInput],
    ) -> Result<(), WalletError>;

    /// Produces this wallet's signature over an escrow-spending input,
    /// using the multisig key reserved for the trade.
    fn sign_multisig_input(
        &self,
        trade_id: &str,
        tx: &Transaction,
        input_index: usize,
        redeemscript: &Script,
        escrow_value: Amount,
    ) -> Result<Signature, WalletError>;

    /// Broadcasts a final transaction, returning its txid.
    fn broadcast(&self, tx: &Transaction) -> Result<Txid, WalletError>;

    /// Confirmation count of a transaction; zero while unconfirmed.
    fn confirmations(&self, txid: &Txid) -> Result<u32, WalletError>;
}
