//! Paper exchange facade.
//!
//! Wires the public feed (levels and trade prints), paper order entry, the
//! matcher, and ghost reconciliation around one [`Market`]. Trade prints are
//! batched into sweeps with [`sweep_boundary`] and, optionally, a timeout;
//! every delivered batch is reconciled before the call that delivered it
//! returns.

use crate::batched::BatchedPubSub;
use crate::clock::Clock;
use crate::config::ExchangeConfig;
use crate::error::Result;
use crate::execution::Execution;
use crate::funds::Asset;
use crate::ghost::{Reconciler, Reconciliation};
use crate::market::{FeedLevel, Market};
use crate::matching::{match_order, MatchReport};
use crate::order::OrderRequest;
use crate::pubsub::SubscriptionId;
use crate::trade::{sweep_boundary, Trade};
use crate::types::{AccountId, BookEntry, OrderId, OrderKind, OrderType, Priority, Side};
use log::{info, warn};
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A strategy's order as submitted to the exchange.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PaperOrder {
    pub account: AccountId,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; for market orders, the reference price escrow is sized at.
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: u64,
}

/// Price level in a book snapshot.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LevelView {
    pub price: Decimal,
    pub quantity: Decimal,
    pub orders: usize,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<LevelView>,
    pub asks: Vec<LevelView>,
}

#[derive(Debug)]
pub struct PaperExchange {
    config: ExchangeConfig,
    market: Market,
    reconciler: Reconciler,
    prints: BatchedPubSub<Trade>,
    sweeps: Rc<RefCell<VecDeque<Vec<Trade>>>>,
    reconciliations: Vec<Reconciliation>,
}

impl PaperExchange {
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        config.validate()?;
        let prints = match config.batch_timeout_ms {
            Some(ms) => BatchedPubSub::new(ms)?,
            None => BatchedPubSub::untimed(),
        };
        Self::assemble(config, prints)
    }

    /// Same as [`new`](Self::new), with batch timers on `clock`.
    pub fn with_clock(config: ExchangeConfig, clock: impl Clock + 'static) -> Result<Self> {
        config.validate()?;
        let prints = match config.batch_timeout_ms {
            Some(ms) => BatchedPubSub::new(ms)?.with_clock(clock),
            None => BatchedPubSub::untimed().with_clock(clock),
        };
        Self::assemble(config, prints)
    }

    fn assemble(config: ExchangeConfig, prints: BatchedPubSub<Trade>) -> Result<Self> {
        let reconciler = Reconciler::boxed(config.reconciliation, config.impediment.build()?)?;
        let mut prints = prints.with_flush_excluding(sweep_boundary());
        let sweeps = Rc::new(RefCell::new(VecDeque::new()));
        let inbox = Rc::clone(&sweeps);
        prints.subscribe(move |batch: &[Trade]| inbox.borrow_mut().push_back(batch.to_vec()));
        info!(
            "exchange started pair={} mode={} batch_timeout_ms={:?}",
            config.pair(),
            config.reconciliation,
            config.batch_timeout_ms
        );
        Ok(Self {
            market: Market::new(config.pair()),
            config,
            reconciler,
            prints,
            sweeps,
            reconciliations: Vec::new(),
        })
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn market_mut(&mut self) -> &mut Market {
        &mut self.market
    }

    pub fn open_account(&mut self, name: &str) -> AccountId {
        self.market.open_account(name)
    }

    pub fn credit(&mut self, account: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        self.market.credit(account, asset, amount)
    }

    pub fn balance(&self, account: AccountId, asset: Asset) -> Result<Decimal> {
        self.market.balance(account, asset)
    }

    pub fn on_feed_level(&mut self, level: FeedLevel) -> Result<()> {
        self.market.apply_level(level)
    }

    /// Funds, indexes and matches a paper order. Funding failures return before
    /// the order is indexed.
    pub fn submit_order(&mut self, order: PaperOrder) -> Result<MatchReport> {
        let request = OrderRequest {
            kind: OrderKind::Paper,
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            quantity: order.quantity,
            priority: Priority::At(order.timestamp),
            account: order.account,
        };
        let id = self.market.place(request)?;
        match_order(&mut self.market, &id, order.timestamp)
    }

    pub fn cancel_order(&mut self, id: &OrderId) -> Result<Decimal> {
        self.market.cancel(id)
    }

    /// Feeds one public trade print. Completed sweeps are reconciled now.
    pub fn on_trade(&mut self, trade: Trade) -> Result<()> {
        self.prints.publish(trade);
        self.drain()
    }

    /// Fires an expired batch timer, if any.
    pub fn poll(&mut self) -> Result<()> {
        self.prints.poll();
        self.drain()
    }

    /// Treats the pending prints as a complete sweep.
    pub fn flush_trades(&mut self) -> Result<()> {
        self.prints.flush();
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            let Some(batch) = self.sweeps.borrow_mut().pop_front() else {
                return Ok(());
            };
            match self.reconciler.reconcile(&mut self.market, &batch) {
                Ok(outcome) => self.reconciliations.push(outcome),
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => warn!("sweep skipped prints={} error={}", batch.len(), e),
            }
        }
    }

    /// Outcomes of every reconciled sweep, oldest first.
    pub fn reconciliations(&self) -> &[Reconciliation] {
        &self.reconciliations
    }

    pub fn take_reconciliations(&mut self) -> Vec<Reconciliation> {
        std::mem::take(&mut self.reconciliations)
    }

    pub fn pending_prints(&self) -> usize {
        self.prints.pending().len()
    }

    pub fn top_bids(&self, n: usize) -> Vec<BookEntry> {
        self.market.combined().top_bids(n)
    }

    pub fn top_asks(&self, n: usize) -> Vec<BookEntry> {
        self.market.combined().top_asks(n)
    }

    pub fn bids_until(&self, price: Decimal) -> Vec<BookEntry> {
        self.market.combined().bids_until(price)
    }

    pub fn asks_until(&self, price: Decimal) -> Vec<BookEntry> {
        self.market.combined().asks_until(price)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.market.combined().best_bid()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.market.combined().best_ask()
    }

    /// Aggregated top `snapshot_depth` levels per side.
    pub fn snapshot(&self) -> BookSnapshot {
        let depth = self.config.snapshot_depth;
        let book = self.market.combined();
        BookSnapshot {
            bids: aggregate(book.side(Side::Buy).iter(), depth),
            asks: aggregate(book.side(Side::Sell).iter(), depth),
        }
    }

    pub fn subscribe_executions(&mut self, callback: impl FnMut(&Execution) + 'static) -> SubscriptionId {
        self.market.subscribe_executions(callback)
    }

    pub fn subscribe_trades(&mut self, callback: impl FnMut(&Trade) + 'static) -> SubscriptionId {
        self.market.subscribe_trades(callback)
    }

    pub fn subscribe_orders(&mut self, callback: impl FnMut(&BookEntry) + 'static) -> SubscriptionId {
        self.market.subscribe_orders(callback)
    }
}

fn aggregate<'a>(entries: impl Iterator<Item = &'a BookEntry>, depth: usize) -> Vec<LevelView> {
    let mut levels: Vec<LevelView> = Vec::new();
    for entry in entries {
        match levels.last_mut() {
            Some(level) if level.price == entry.price => {
                level.quantity += entry.remaining;
                level.orders += 1;
            }
            _ => {
                if levels.len() == depth {
                    break;
                }
                levels.push(LevelView {
                    price: entry.price,
                    quantity: entry.remaining,
                    orders: 1,
                });
            }
        }
    }
    levels
}
