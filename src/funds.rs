//! Assets and bearer-token funds.
//!
//! A [`Funds`] value is the only way balances move between wallets and order
//! escrow. It is neither `Clone` nor `Copy`: depositing drains it, and a refused
//! deposit leaves the value with the caller.
//!
//! ```compile_fail
//! use paper_exchange::{Asset, Wallet};
//! use rust_decimal::Decimal;
//!
//! let mut wallet = Wallet::new("w1", "primary");
//! wallet.credit(Asset::Usd, Decimal::from(10));
//! let funds = wallet.withdraw(Asset::Usd, Decimal::from(5)).unwrap();
//! let copy = funds.clone(); // Funds is not Clone
//! ```

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use std::fmt;

/// Tradable asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Usd,
    Btc,
    Eth,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Asset::Usd => "USD",
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
        })
    }
}

/// Base/quote pair; prices are quote per one unit of base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AssetPair {
    pub base: Asset,
    pub quote: Asset,
}

impl AssetPair {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }
}

impl Default for AssetPair {
    fn default() -> Self {
        Self::new(Asset::Btc, Asset::Usd)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// A quantity of one asset held outside any wallet.
#[derive(Debug, PartialEq)]
#[must_use = "dropping Funds destroys the balance they carry"]
pub struct Funds {
    asset: Asset,
    amount: Decimal,
}

impl Funds {
    /// Creates new funds. Only wallets with an infinite policy and the ledger
    /// faucet mint.
    pub(crate) fn mint(asset: Asset, amount: Decimal) -> Self {
        Self { asset, amount }
    }

    pub fn empty(asset: Asset) -> Self {
        Self {
            asset,
            amount: Decimal::ZERO,
        }
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn is_empty(&self) -> bool {
        self.amount.is_zero()
    }

    /// Splits `amount` off into a new token. Fails without change if short.
    pub fn split(&mut self, amount: Decimal) -> Result<Funds> {
        if amount < Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("cannot split negative amount {}", amount)));
        }
        if amount > self.amount {
            return Err(Error::InsufficientFunds {
                asset: self.asset,
                requested: amount,
                available: self.amount,
            });
        }
        self.amount -= amount;
        Ok(Funds::mint(self.asset, amount))
    }

    /// Splits off everything, leaving this token empty.
    pub fn drain(&mut self) -> Funds {
        let amount = std::mem::take(&mut self.amount);
        Funds::mint(self.asset, amount)
    }

    /// Absorbs another token of the same asset.
    pub fn merge(&mut self, other: Funds) -> Result<()> {
        if other.asset != self.asset {
            return Err(Error::AssetMismatch {
                expected: self.asset,
                actual: other.asset,
            });
        }
        self.amount += other.amount;
        Ok(())
    }
}
