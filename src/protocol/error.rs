//! All escrow contract related errors.

use bitcoin::{secp256k1, Amount, OutPoint};

/// Errors that can occur during escrow contract operations.
///
/// Encapsulates errors from:
/// - Cryptographic operations
/// - Amount arithmetic
/// - Script handling
/// - Transaction verification
#[derive(Debug)]
pub enum ContractError {
    /// Secp256k1 cryptographic errors.
    Secp(secp256k1::Error),
    /// Contract rule violation with static message.
    Protocol(&'static str),
    /// A contributed input references an output type the escrow script
    /// cannot be funded from.
    UnsupportedSpendType(OutPoint),
    /// Contributed inputs do not cover the amount a party owes.
    InsufficientInputValue {
        /// Sum of the party's contributed inputs.
        available: Amount,
        /// Amount owed plus the party's fee share.
        required: Amount,
    },
    /// Amount arithmetic overflowed.
    AmountOverflow,
    /// The escrow output carries a different value than the contract demands.
    EscrowValueMismatch {
        /// Escrow output value the contract demands.
        expected: Amount,
        /// Escrow output value found in the transaction.
        found: Amount,
    },
    /// Key slice conversion errors.
    Key(bitcoin::key::FromSliceError),
    /// Signature hash computation errors.
    Sighash(bitcoin::transaction::InputsIndexError),
    /// Lock time out of representable range.
    Locktime(bitcoin::absolute::ConversionError),
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ContractError {}

impl From<secp256k1::Error> for ContractError {
    fn from(value: secp256k1::Error) -> Self {
        Self::Secp(value)
    }
}

impl From<bitcoin::key::FromSliceError> for ContractError {
    fn from(value: bitcoin::key::FromSliceError) -> Self {
        Self::Key(value)
    }
}

impl From<bitcoin::transaction::InputsIndexError> for ContractError {
    fn from(value: bitcoin::transaction::InputsIndexError) -> Self {
        Self::Sighash(value)
    }
}

impl From<bitcoin::absolute::ConversionError> for ContractError {
    fn from(value: bitcoin::absolute::ConversionError) -> Self {
        Self::Locktime(value)
    }
}
