//! The trade protocol: typed peer messages and escrow transaction construction.

pub mod contract;
pub mod error;
pub mod messages;
