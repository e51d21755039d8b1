//! All engine related errors.

use std::sync::{MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    error::ProtocolError,
    offer::OfferError,
    trade::{store::StoreError, tasks::StepError},
    wallet::WalletError,
};

/// Represents errors that can occur while the engine drives trades.
///
/// Encapsulates errors from:
/// - Offer validation
/// - Task chain execution
/// - The trade store
/// - Threading and synchronization
#[derive(Debug)]
pub enum EngineError {
    /// Standard IO errors during file operations.
    IO(std::io::Error),
    /// Offer failed validation against the payment catalog.
    Offer(OfferError),
    /// A task chain failed; the failure is also recorded on the trade.
    Task(StepError),
    /// Trade store read or write failure.
    Store(StoreError),
    /// Errors from wallet operations like signing or broadcasting.
    Wallet(WalletError),
    /// Errors related to trade protocol violations.
    Protocol(ProtocolError),
    /// No trade exists under the given id.
    UnknownTrade(String),
    /// A trade already exists under the given id.
    DuplicateTrade(String),
    /// Threading error when a lock is poisoned due to a thread panic.
    MutexPoison,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<OfferError> for EngineError {
    fn from(value: OfferError) -> Self {
        Self::Offer(value)
    }
}

impl From<StepError> for EngineError {
    fn from(value: StepError) -> Self {
        Self::Task(value)
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<WalletError> for EngineError {
    fn from(value: WalletError) -> Self {
        Self::Wallet(value)
    }
}

impl From<ProtocolError> for EngineError {
    fn from(value: ProtocolError) -> Self {
        Self::Protocol(value)
    }
}

impl<'a, T> From<PoisonError<RwLockReadGuard<'a, T>>> for EngineError {
    fn from(_: PoisonError<RwLockReadGuard<'a, T>>) -> Self {
        Self::MutexPoison
    }
}

impl<'a, T> From<PoisonError<RwLockWriteGuard<'a, T>>> for EngineError {
    fn from(_: PoisonError<RwLockWriteGuard<'a, T>>) -> Self {
        Self::MutexPoison
    }
}

impl<'a, T> From<PoisonError<MutexGuard<'a, T>>> for EngineError {
    fn from(_: PoisonError<MutexGuard<'a, T>>) -> Self {
        Self::MutexPoison
    }
}
