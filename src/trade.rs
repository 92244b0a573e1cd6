//! Trade prints and sweep batching.
//!
//! A [`Trade`]'s side is the side of the resting liquidity it consumed: a sell
//! print took an ask. A sweep is a run of same-side prints moving outward
//! (asks upward, bids downward) at one timestamp.

use crate::types::Side;
use rust_decimal::Decimal;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Trade {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: u64,
}

impl Trade {
    pub fn new(side: Side, price: Decimal, quantity: Decimal, timestamp: u64) -> Self {
        Self {
            side,
            price,
            quantity,
            timestamp,
        }
    }
}

/// Flush-excluding predicate for batching prints into sweeps.
///
/// Returns true (start a new batch with this print) when the timestamp changes,
/// the side changes, or the price moves inward relative to the previous print.
pub fn sweep_boundary() -> impl FnMut(&Trade) -> bool {
    let mut prev: Option<(Side, Decimal, u64)> = None;
    move |trade: &Trade| {
        let boundary = match prev {
            None => false,
            Some((side, price, ts)) => {
                side != trade.side || ts != trade.timestamp || side.better(trade.price, price)
            }
        };
        prev = Some((trade.side, trade.price, trade.timestamp));
        boundary
    }
}
