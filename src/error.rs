//! Error taxonomy for the exchange simulator.
//!
//! [`Error::InsufficientFunds`] is fatal to the triggering operation only.
//! [`Error::InvalidOrderState`] marks a programming defect; the matching loop
//! logs it and cancels the offending remainder instead of propagating.
//! [`Error::Configuration`] is raised at construction time and always propagates.

use crate::funds::Asset;
use crate::types::{AccountId, OrderId};
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("insufficient funds for {asset}: requested {requested}, available {available}")]
    InsufficientFunds {
        asset: Asset,
        requested: Decimal,
        available: Decimal,
    },

    #[error("invalid order state: {0}")]
    InvalidOrderState(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("account {account} rejected the transfer: {reason}")]
    WalletRejected { account: AccountId, reason: String },

    #[error("asset mismatch: expected {expected}, got {actual}")]
    AssetMismatch { expected: Asset, actual: Asset },
}

impl Error {
    /// Configuration errors are never swallowed by the fail-the-unit loops.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}
