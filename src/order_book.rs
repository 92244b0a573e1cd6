//! Order book: one [`PriceTimeIndex`] per side.
//!
//! The book never owns orders. It holds [`BookEntry`] snapshots and is told to
//! [`OrderBook::reindex`] whenever an order it is registered for changes; the
//! entry is routed to the side matching its `side` field.

use crate::price_time::PriceTimeIndex;
use crate::types::{BookEntry, OrderId, Side};
use rust_decimal::Decimal;

/// Stable handle of a book inside a [`Market`](crate::market::Market).
///
/// Only the market's own constants exist, so a handle always names a book:
///
/// ```compile_fail
/// let handle = paper_exchange::BookHandle(7);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookHandle(pub(crate) usize);

#[derive(Debug)]
pub struct OrderBook {
    name: String,
    bids: PriceTimeIndex,
    asks: PriceTimeIndex,
}

impl OrderBook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bids: PriceTimeIndex::new(Side::Buy),
            asks: PriceTimeIndex::new(Side::Sell),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn side_mut(&mut self, side: Side) -> &mut PriceTimeIndex {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn side(&self, side: Side) -> &PriceTimeIndex {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Brings the entry for `entry.id` in line with `entry`: insert, move, or
    /// (remaining zero) remove.
    pub fn reindex(&mut self, entry: BookEntry) {
        self.side_mut(entry.side).upsert(entry);
    }

    /// Drops an order from whichever side holds it.
    pub fn remove(&mut self, id: &OrderId) -> bool {
        self.bids.remove(id) || self.asks.remove(id)
    }

    pub fn get(&self, id: &OrderId) -> Option<&BookEntry> {
        self.bids.get(id).or_else(|| self.asks.get(id))
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn top_bids(&self, n: usize) -> Vec<BookEntry> {
        self.bids.first(n)
    }

    pub fn top_asks(&self, n: usize) -> Vec<BookEntry> {
        self.asks.first(n)
    }

    pub fn bids_until(&self, price: Decimal) -> Vec<BookEntry> {
        self.bids.until(price)
    }

    pub fn asks_until(&self, price: Decimal) -> Vec<BookEntry> {
        self.asks.until(price)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.best().map(|e| e.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.best().map(|e| e.price)
    }

    /// Total remaining quantity resting at exactly `price` on `side`.
    pub fn level_quantity(&self, side: Side, price: Decimal) -> Decimal {
        self.side(side)
            .iter()
            .skip_while(|e| side.better(e.price, price))
            .take_while(|e| e.price == price)
            .map(|e| e.remaining)
            .sum()
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        self.bids.check_invariants()?;
        self.asks.check_invariants()
    }
}
