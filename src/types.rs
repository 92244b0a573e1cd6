//! Core types and identifiers for the simulator.
//!
//! Identifiers are newtype wrappers, except [`OrderId`], which carries enough of
//! the order (kind, side, price, priority, sequence) to be read in a log line.

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Account identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Execution identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ExecutionId(pub u64);

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// True if `a` is strictly better than `b` for resting liquidity on this side
    /// (higher for bids, lower for asks).
    pub fn better(self, a: Decimal, b: Decimal) -> bool {
        match self {
            Side::Buy => a > b,
            Side::Sell => a < b,
        }
    }

    pub fn better_or_equal(self, a: Decimal, b: Decimal) -> bool {
        a == b || self.better(a, b)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "B",
            Side::Sell => "S",
        })
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "b" | "buy" | "bid" => Ok(Side::Buy),
            "s" | "sell" | "ask" => Ok(Side::Sell),
            other => Err(Error::Configuration(format!("unknown side tag {:?}", other))),
        }
    }
}

/// Where an order came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum OrderKind {
    /// Aggregated level from the public (L2) feed.
    Feed,
    /// Synthetic order placed by a paper-trading strategy.
    Paper,
    /// Synthetic order inferred by ghost reconciliation.
    Ghost,
}

impl OrderKind {
    pub fn is_synthetic(self) -> bool {
        !matches!(self, OrderKind::Feed)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderKind::Feed => "L2",
            OrderKind::Paper => "PAPER",
            OrderKind::Ghost => "GHOST",
        })
    }
}

/// Order type: limit (price is a bound) or market (price only sizes escrow).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

/// Time priority within a price level.
///
/// `Absolute` sorts ahead of every real timestamp; the derive relies on
/// variant order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Priority {
    Absolute,
    At(u64),
}

impl Priority {
    pub fn is_absolute(self) -> bool {
        matches!(self, Priority::Absolute)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Absolute => f.write_str("ABS"),
            Priority::At(ts) => write!(f, "{}", ts),
        }
    }
}

/// Stable, human-readable order identifier.
///
/// Feed orders are one per price level, so their sequence is always zero and
/// the id is derived from side and price alone. Synthetic orders get a
/// monotonically increasing sequence from the market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OrderId {
    pub kind: OrderKind,
    pub side: Side,
    pub price: Decimal,
    pub priority: Priority,
    pub seq: u64,
}

impl OrderId {
    pub fn feed(side: Side, price: Decimal) -> Self {
        Self {
            kind: OrderKind::Feed,
            side,
            price: price.normalize(),
            priority: Priority::At(0),
            seq: 0,
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == OrderKind::Feed {
            return write!(f, "{}-{}-{}", self.kind, self.side, self.price);
        }
        write!(
            f,
            "{}-{}-{}@{}#{}",
            self.kind,
            self.side,
            self.price,
            self.priority,
            base34(self.seq)
        )
    }
}

const BASE34: &[u8] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Base-34 (no `I`, no `O`), left-padded to three characters. Never wraps.
pub fn base34(mut n: u64) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(BASE34[(n % 34) as usize]);
        n /= 34;
        if n == 0 {
            break;
        }
    }
    while digits.len() < 3 {
        digits.push(b'0');
    }
    digits.iter().rev().map(|&b| b as char).collect()
}

/// Snapshot of a live order as seen through a book index.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BookEntry {
    pub id: OrderId,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Decimal,
    pub remaining: Decimal,
    pub priority: Priority,
    pub account: AccountId,
}
