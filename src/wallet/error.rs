//! All Wallet-related errors.

use crate::protocol::error::ContractError;

/// Represents various errors that can occur within a wallet implementation.
///
/// This enum consolidates errors from multiple sources such as I/O, node
/// communication, and signing, so the engine can tell transient wallet
/// trouble apart from contract violations.
#[derive(Debug)]
pub enum WalletError {
    /// Represents a standard I/O error.
    ///
    /// Typically occurs during file or network operations.
    IO(std::io::Error),

    /// Represents an error returned by the node the wallet talks to.
    ///
    /// Typically occurs during broadcast or confirmation queries.
    Rpc(String),

    /// Represents a general error with a descriptive message.
    ///
    /// Use this variant for errors that do not fall under any specific category.
    General(String),

    /// Represents an error from the Secp256k1 cryptographic library.
    ///
    /// Typically occurs during signature generation.
    Secp(bitcoin::secp256k1::Error),

    /// Represents an error raised by escrow contract helpers during signing.
    Contract(ContractError),

    /// Represents an error when the wallet has insufficient funds to
    /// complete an operation.
    InsufficientFund {
        /// The amount of funds available in the wallet.
        available: u64,
        /// The amount of funds needed to complete the operation.
        required: u64,
    },

    /// No key reservation exists for the given trade.
    MissingReservation(String),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for WalletError {}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        Self::IO(e)
    }
}

impl From<bitcoin::secp256k1::Error> for WalletError {
    fn from(value: bitcoin::secp256k1::Error) -> Self {
        Self::Secp(value)
    }
}

impl From<ContractError> for WalletError {
    fn from(value: ContractError) -> Self {
        Self::Contract(value)
    }
}
