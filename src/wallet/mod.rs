//! The wallet boundary. Used by both the Taker and Maker sides of a trade.
//!
//! The engine never holds keys or talks to a node itself; everything
//! key- or chain-touching goes through the [`WalletApi`] trait.

mod api;
mod error;

pub use api::{AddressEntry, FundingSelection, KeyContext, WalletApi};
pub use error::WalletError;
