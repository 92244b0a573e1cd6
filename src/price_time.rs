//! Price-time priority index for one side of a book.
//!
//! Best price first (highest bid, lowest ask), then earliest priority, with
//! [`Priority::Absolute`](crate::types::Priority::Absolute) ahead of every
//! timestamp. Ties beyond that fall back to insertion order in the map.

use crate::tree::PriorityMap;
use crate::types::{BookEntry, OrderId, Side};
use rust_decimal::Decimal;
use std::cmp::Ordering;

fn bid_priority(a: &BookEntry, b: &BookEntry) -> Ordering {
    b.price.cmp(&a.price).then(a.priority.cmp(&b.priority))
}

fn ask_priority(a: &BookEntry, b: &BookEntry) -> Ordering {
    a.price.cmp(&b.price).then(a.priority.cmp(&b.priority))
}

/// One side of a book: exactly one entry per live order id.
#[derive(Debug)]
pub struct PriceTimeIndex {
    side: Side,
    entries: PriorityMap<OrderId, BookEntry>,
}

impl PriceTimeIndex {
    pub fn new(side: Side) -> Self {
        let cmp: fn(&BookEntry, &BookEntry) -> Ordering = match side {
            Side::Buy => bid_priority,
            Side::Sell => ask_priority,
        };
        Self {
            side,
            entries: PriorityMap::with_comparator(cmp),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &OrderId) -> Option<&BookEntry> {
        self.entries.get(id)
    }

    /// Inserts or repositions `entry`; a non-positive remaining quantity removes it.
    pub fn upsert(&mut self, entry: BookEntry) {
        if entry.remaining <= Decimal::ZERO {
            self.entries.remove(&entry.id);
        } else {
            self.entries.set(entry.id, entry);
        }
    }

    pub fn remove(&mut self, id: &OrderId) -> bool {
        self.entries.remove(id)
    }

    pub fn best(&self) -> Option<&BookEntry> {
        self.entries.first().map(|(_, e)| e)
    }

    /// Entries in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &BookEntry> {
        self.entries.values()
    }

    /// Top `n` entries by priority.
    pub fn first(&self, n: usize) -> Vec<BookEntry> {
        self.iter().take(n).cloned().collect()
    }

    /// All entries priced at or better than `price`.
    pub fn until(&self, price: Decimal) -> Vec<BookEntry> {
        let side = self.side;
        self.iter()
            .take_while(|e| side.better_or_equal(e.price, price))
            .cloned()
            .collect()
    }

    /// Total remaining quantity at or better than `price`.
    pub fn depth_until(&self, price: Decimal) -> Decimal {
        let side = self.side;
        self.iter()
            .take_while(|e| side.better_or_equal(e.price, price))
            .map(|e| e.remaining)
            .sum()
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        self.entries.check_invariants()?;
        if let Some(e) = self.iter().find(|e| e.side != self.side) {
            return Err(format!("{} indexed on the {} side", e.id, self.side));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, OrderKind, Priority};

    fn entry(seq: u64, side: Side, price: i64, priority: Priority, qty: i64) -> BookEntry {
        let price = Decimal::from(price);
        BookEntry {
            id: OrderId {
                kind: OrderKind::Paper,
                side,
                price,
                priority,
                seq,
            },
            side,
            kind: OrderKind::Paper,
            price,
            remaining: Decimal::from(qty),
            priority,
            account: AccountId(1),
        }
    }

    #[test]
    fn bids_best_price_then_earliest_time() {
        let mut bids = PriceTimeIndex::new(Side::Buy);
        let a = entry(1, Side::Buy, 100, Priority::At(1), 1);
        let b = entry(2, Side::Buy, 100, Priority::At(2), 1);
        let c = entry(3, Side::Buy, 101, Priority::At(1), 1);
        bids.upsert(a.clone());
        bids.upsert(b.clone());
        bids.upsert(c.clone());
        let order: Vec<OrderId> = bids.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![c.id, a.id, b.id]);

        let mut gone = b.clone();
        gone.remaining = Decimal::ZERO;
        bids.upsert(gone);
        let order: Vec<OrderId> = bids.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![c.id, a.id]);
        bids.check_invariants().unwrap();
    }

    #[test]
    fn asks_lowest_price_first_and_absolute_priority_wins_ties() {
        let mut asks = PriceTimeIndex::new(Side::Sell);
        asks.upsert(entry(1, Side::Sell, 104, Priority::At(5), 1));
        asks.upsert(entry(2, Side::Sell, 104, Priority::Absolute, 2));
        asks.upsert(entry(3, Side::Sell, 103, Priority::At(9), 3));
        let qtys: Vec<Decimal> = asks.iter().map(|e| e.remaining).collect();
        assert_eq!(qtys, vec![Decimal::from(3), Decimal::from(2), Decimal::from(1)]);
    }

    #[test]
    fn until_stops_at_worse_prices() {
        let mut asks = PriceTimeIndex::new(Side::Sell);
        for (seq, p) in [(1, 100), (2, 101), (3, 102), (4, 103)] {
            asks.upsert(entry(seq, Side::Sell, p, Priority::At(seq), 2));
        }
        let window = asks.until(Decimal::from(102));
        assert_eq!(window.len(), 3);
        assert_eq!(window.last().map(|e| e.price), Some(Decimal::from(102)));
        assert_eq!(asks.depth_until(Decimal::from(101)), Decimal::from(4));
        assert_eq!(asks.first(2).len(), 2);
    }

    #[test]
    fn quantity_change_keeps_one_entry() {
        let mut bids = PriceTimeIndex::new(Side::Buy);
        let mut a = entry(1, Side::Buy, 100, Priority::At(1), 5);
        bids.upsert(a.clone());
        a.remaining = Decimal::from(2);
        bids.upsert(a.clone());
        assert_eq!(bids.len(), 1);
        assert_eq!(bids.best().map(|e| e.remaining), Some(Decimal::from(2)));
    }
}
