//! High-level network and protocol errors.
//!
//! Provides error types for:
//! - Message framing and transfer (NetError)
//! - Protocol violations (ProtocolError)
//!
use std::error::Error;

use crate::protocol::error::ContractError;

/// Network-related errors that can occur while framing and transferring
/// protocol messages.
///
/// Encapsulates errors from:
/// - IO operations
/// - Data serialization
/// - Message framing
#[derive(Debug)]
pub enum NetError {
    /// Standard IO errors during read/write operations.
    IO(std::io::Error),
    /// Connection closed unexpectedly, reached end of stream.
    ReachedEOF,
    /// CBOR serialization or deserialization error.
    Cbor(serde_cbor::Error),
    /// Inbound message length exceeds the framing limit.
    MessageTooLong(usize),
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for NetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl From<std::io::Error> for NetError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<serde_cbor::Error> for NetError {
    fn from(value: serde_cbor::Error) -> Self {
        Self::Cbor(value)
    }
}

/// Protocol-level errors that can occur while a trade executes.
///
/// Encapsulates errors from:
/// - Message sequencing
/// - Counterparty data validation
/// - Escrow transaction verification
/// - Contract operations
#[derive(Debug)]
pub enum ProtocolError {
    /// Received unexpected message in protocol sequence.
    WrongMessage {
        /// Message type the current chain expected.
        expected: String,
        /// Message type actually received.
        received: String,
    },
    /// Counterparty data required by the current step was never received.
    MissingPeerData(&'static str),
    /// Both parties computed different contract hashes; terms are not agreed.
    ContractHashMismatch,
    /// The locally reserved multisig key does not match the one recorded in
    /// the wallet. Indicates external state corruption; fatal for the trade.
    MultisigKeyMismatch,
    /// Error in escrow transaction creation or validation.
    Contract(ContractError),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl From<ContractError> for ProtocolError {
    fn from(value: ContractError) -> Self {
        Self::Contract(value)
    }
}
