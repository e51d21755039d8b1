#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
extern crate bitcoin;

pub mod config;
pub mod engine;
pub mod error;
pub mod offer;
pub mod payment;
pub mod protocol;
pub mod trade;
pub mod utill;
pub mod wallet;
