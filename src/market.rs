//! Order store, books, and event feeds for one asset pair.
//!
//! The [`Market`] owns every live [`Order`]. Books only hold snapshots; the
//! registration table maps each order id to the [`BookHandle`]s that index it,
//! and every mutation goes through [`Market::reindex`] so no book is left stale.
//! An order reaching zero remaining is dropped from its books and from the store.

use crate::account::{AccountPolicy, Ledger};
use crate::error::{Error, Result};
use crate::execution::Execution;
use crate::funds::{Asset, AssetPair};
use crate::order::{funding_for, Order, OrderRequest};
use crate::order_book::{BookHandle, OrderBook};
use crate::pubsub::{PubSub, SubscriptionId};
use crate::trade::Trade;
use crate::types::{AccountId, BookEntry, ExecutionId, OrderId, OrderKind, OrderType, Priority, Side};
use log::{debug, info};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};

/// Every order, whatever its source.
pub const COMBINED: BookHandle = BookHandle(0);
pub const FEED_BOOK: BookHandle = BookHandle(1);
pub const PAPER_BOOK: BookHandle = BookHandle(2);
pub const GHOST_BOOK: BookHandle = BookHandle(3);

pub fn book_for(kind: OrderKind) -> BookHandle {
    match kind {
        OrderKind::Feed => FEED_BOOK,
        OrderKind::Paper => PAPER_BOOK,
        OrderKind::Ghost => GHOST_BOOK,
    }
}

/// One aggregated level from the public feed. Quantity zero removes the level.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeedLevel {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: u64,
}

#[derive(Debug)]
pub struct Market {
    pair: AssetPair,
    ledger: Ledger,
    market_account: AccountId,
    ghost_account: AccountId,
    orders: HashMap<OrderId, Order>,
    books: Vec<OrderBook>,
    registrations: HashMap<OrderId, BTreeSet<BookHandle>>,
    next_seq: u64,
    next_execution: u64,
    order_feed: PubSub<BookEntry>,
    trade_feed: PubSub<Trade>,
    execution_feed: PubSub<Execution>,
}

impl Market {
    pub fn new(pair: AssetPair) -> Self {
        let mut ledger = Ledger::new();
        let market_account = ledger.open("public-market", AccountPolicy::Infinite);
        let ghost_account = ledger.open("ghost", AccountPolicy::Infinite);
        Self {
            pair,
            ledger,
            market_account,
            ghost_account,
            orders: HashMap::new(),
            books: vec![
                OrderBook::new("combined"),
                OrderBook::new("feed"),
                OrderBook::new("paper"),
                OrderBook::new("ghost"),
            ],
            registrations: HashMap::new(),
            next_seq: 0,
            next_execution: 0,
            order_feed: PubSub::new(),
            trade_feed: PubSub::new(),
            execution_feed: PubSub::new(),
        }
    }

    pub fn pair(&self) -> AssetPair {
        self.pair
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    /// Infinite account behind public feed liquidity.
    pub fn market_account(&self) -> AccountId {
        self.market_account
    }

    /// Infinite account behind ghost orders and ghost counterparties.
    pub fn ghost_account(&self) -> AccountId {
        self.ghost_account
    }

    pub fn open_account(&mut self, name: &str) -> AccountId {
        self.ledger.open(name, AccountPolicy::Real)
    }

    pub fn credit(&mut self, account: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        self.ledger.credit(account, asset, amount)
    }

    pub fn balance(&self, account: AccountId, asset: Asset) -> Result<Decimal> {
        self.ledger.balance(account, asset)
    }

    pub fn book(&self, handle: BookHandle) -> &OrderBook {
        &self.books[handle.0]
    }

    pub fn combined(&self) -> &OrderBook {
        self.book(COMBINED)
    }

    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn registrations(&self, id: &OrderId) -> Option<&BTreeSet<BookHandle>> {
        self.registrations.get(id)
    }

    pub fn subscribe_orders(&mut self, callback: impl FnMut(&BookEntry) + 'static) -> SubscriptionId {
        self.order_feed.subscribe(callback)
    }

    pub fn subscribe_trades(&mut self, callback: impl FnMut(&Trade) + 'static) -> SubscriptionId {
        self.trade_feed.subscribe(callback)
    }

    pub fn subscribe_executions(&mut self, callback: impl FnMut(&Execution) + 'static) -> SubscriptionId {
        self.execution_feed.subscribe(callback)
    }

    fn next_id(&mut self, kind: OrderKind, side: Side, price: Decimal, priority: Priority) -> OrderId {
        self.next_seq += 1;
        OrderId {
            kind,
            side,
            price: price.normalize(),
            priority,
            seq: self.next_seq,
        }
    }

    fn next_execution_id(&mut self) -> ExecutionId {
        self.next_execution += 1;
        ExecutionId(self.next_execution)
    }

    /// Opens a synthetic order, funds it, and indexes it in the combined book
    /// and its kind's book. Funding failures return before anything is indexed.
    pub fn place(&mut self, request: OrderRequest) -> Result<OrderId> {
        if request.kind == OrderKind::Feed {
            return Err(Error::InvalidOrderState("feed liquidity enters through apply_level".into()));
        }
        let id = self.next_id(request.kind, request.side, request.price, request.priority);
        let order = Order::open(id, self.pair, &request, &mut self.ledger)?;
        info!(
            "order placed order_id={} account={} side={} type={:?} quantity={} price={}",
            id, request.account, request.side, request.order_type, request.quantity, request.price
        );
        self.insert(order);
        Ok(id)
    }

    fn insert(&mut self, order: Order) {
        let id = order.id();
        self.registrations
            .insert(id, BTreeSet::from([COMBINED, book_for(order.kind())]));
        self.orders.insert(id, order);
        self.reindex(&id);
    }

    /// Creates, resizes or (quantity zero) removes the feed order for one level.
    pub fn apply_level(&mut self, level: FeedLevel) -> Result<()> {
        if level.quantity < Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("feed level quantity cannot be negative, got {}", level.quantity)));
        }
        let id = OrderId::feed(level.side, level.price);
        if self.orders.contains_key(&id) {
            return self.set_quantity(&id, level.quantity).map(|_| ());
        }
        if level.quantity.is_zero() {
            debug!("feed level removal for absent level order_id={}", id);
            return Ok(());
        }
        let request = OrderRequest {
            kind: OrderKind::Feed,
            side: level.side,
            order_type: OrderType::Limit,
            price: level.price,
            quantity: level.quantity,
            priority: Priority::At(level.timestamp),
            account: self.market_account,
        };
        let order = Order::open(id, self.pair, &request, &mut self.ledger)?;
        self.insert(order);
        Ok(())
    }

    /// Pushes the order's current state to every registered book and the order
    /// feed. Retires the order once nothing remains.
    pub fn reindex(&mut self, id: &OrderId) {
        let Some(order) = self.orders.get(id) else {
            return;
        };
        let entry = order.entry();
        if let Some(handles) = self.registrations.get(id) {
            for handle in handles {
                self.books[handle.0].reindex(entry.clone());
            }
        }
        if entry.remaining.is_zero() {
            self.registrations.remove(id);
            self.orders.remove(id);
            debug!("order retired order_id={}", id);
        }
        self.order_feed.publish(&entry);
    }

    fn order_mut(&mut self, id: &OrderId) -> Result<&mut Order> {
        self.orders.get_mut(id).ok_or(Error::UnknownOrder(*id))
    }

    /// Cancels everything left on the order.
    pub fn cancel(&mut self, id: &OrderId) -> Result<Decimal> {
        let remaining = self.order_mut(id)?.remaining();
        self.cancel_quantity(id, remaining)?;
        Ok(remaining)
    }

    /// Fails if [`Market::cancel_quantity`] would be refused. Changes nothing.
    pub fn check_cancel(&self, id: &OrderId, quantity: Decimal) -> Result<()> {
        let order = self.orders.get(id).ok_or(Error::UnknownOrder(*id))?;
        order.check_cancel(quantity, &self.ledger)
    }

    pub fn cancel_quantity(&mut self, id: &OrderId, quantity: Decimal) -> Result<()> {
        let order = self.orders.get_mut(id).ok_or(Error::UnknownOrder(*id))?;
        order.cancel(quantity, &mut self.ledger)?;
        info!("order cancelled order_id={} quantity={} remaining={}", id, quantity, order.remaining());
        self.reindex(id);
        Ok(())
    }

    /// Returns whether the remaining quantity changed.
    pub fn set_quantity(&mut self, id: &OrderId, remaining: Decimal) -> Result<bool> {
        let order = self.orders.get_mut(id).ok_or(Error::UnknownOrder(*id))?;
        let changed = order.resize(remaining, &mut self.ledger)?;
        if changed {
            self.reindex(id);
        }
        Ok(changed)
    }

    pub fn set_price(&mut self, id: &OrderId, price: Decimal) -> Result<bool> {
        let order = self.orders.get_mut(id).ok_or(Error::UnknownOrder(*id))?;
        let changed = order.reprice(price, &mut self.ledger)?;
        if changed {
            self.reindex(id);
        }
        Ok(changed)
    }

    pub fn set_priority(&mut self, id: &OrderId, priority: Priority) -> Result<bool> {
        let changed = self.order_mut(id)?.set_priority(priority);
        if changed {
            self.reindex(id);
        }
        Ok(changed)
    }

    /// Builds a pending execution between two live orders.
    pub fn new_execution(&mut self, buy: OrderId, sell: OrderId, price: Decimal, quantity: Decimal, timestamp: u64) -> Execution {
        let id = self.next_execution_id();
        Execution::new(id, buy, sell, price, quantity, timestamp)
    }

    fn settle(&mut self, execution: &mut Execution) -> Result<()> {
        let buy_id = execution.buy_order();
        let sell_id = execution.sell_order();
        let mut buy = self.orders.remove(&buy_id).ok_or(Error::UnknownOrder(buy_id))?;
        let Some(mut sell) = self.orders.remove(&sell_id) else {
            self.orders.insert(buy_id, buy);
            return Err(Error::UnknownOrder(sell_id));
        };
        let result = execution.execute(&mut buy, &mut sell, &mut self.ledger);
        self.orders.insert(buy_id, buy);
        self.orders.insert(sell_id, sell);
        result
    }

    fn announce(&mut self, execution: &Execution) {
        info!(
            "execution exec_id={} buy={} sell={} price={} quantity={}",
            execution.id().0,
            execution.buy_order(),
            execution.sell_order(),
            execution.price(),
            execution.quantity()
        );
        self.execution_feed.publish(execution);
        for side in [Side::Buy, Side::Sell] {
            let trade = Trade::new(side, execution.price(), execution.quantity(), execution.timestamp());
            self.trade_feed.publish(&trade);
        }
    }

    /// Runs a pending execution between two stored orders, reindexes both and
    /// publishes the execution and one trade per side.
    pub fn execute(&mut self, execution: &mut Execution) -> Result<()> {
        self.settle(execution)?;
        self.reindex(&execution.buy_order());
        self.reindex(&execution.sell_order());
        self.announce(execution);
        Ok(())
    }

    /// Fails if [`Market::execute_against_ghost`] would be refused. Changes nothing.
    pub fn check_ghost_fill(&self, id: &OrderId, quantity: Decimal) -> Result<()> {
        let order = self.orders.get(id).ok_or(Error::UnknownOrder(*id))?;
        if quantity <= Decimal::ZERO || quantity > order.remaining() {
            return Err(Error::InvalidQuantity(format!(
                "cannot fill {} of {} remaining on {}",
                quantity,
                order.remaining(),
                id
            )));
        }
        let (asset, cost) = funding_for(self.pair, order.side(), order.price(), quantity);
        if order.escrow().amount() < cost {
            return Err(Error::InsufficientFunds {
                asset,
                requested: cost,
                available: order.escrow().amount(),
            });
        }
        if !self.ledger.can_deposit(order.account()) {
            return Err(Error::WalletRejected {
                account: order.account(),
                reason: "cannot receive fill proceeds".into(),
            });
        }
        Ok(())
    }

    /// Fills `quantity` of a stored order against a transient counterparty
    /// funded by the ghost account, at the order's own price.
    pub fn execute_against_ghost(&mut self, id: &OrderId, quantity: Decimal, timestamp: u64) -> Result<Execution> {
        self.check_ghost_fill(id, quantity)?;
        let order = self.orders.get(id).ok_or(Error::UnknownOrder(*id))?;
        let side = order.side().opposite();
        let price = order.price();
        let request = OrderRequest::limit(OrderKind::Ghost, side, price, quantity, Priority::Absolute, self.ghost_account);
        let counter_id = self.next_id(OrderKind::Ghost, side, price, Priority::Absolute);
        let counter = Order::open(counter_id, self.pair, &request, &mut self.ledger)?;
        self.orders.insert(counter_id, counter);

        let (buy, sell) = match side {
            Side::Buy => (counter_id, *id),
            Side::Sell => (*id, counter_id),
        };
        let mut execution = self.new_execution(buy, sell, price, quantity, timestamp);
        let result = self.settle(&mut execution);
        if let Some(mut counter) = self.orders.remove(&counter_id) {
            counter.close(&mut self.ledger)?;
        }
        result?;
        self.reindex(id);
        self.announce(&execution);
        Ok(execution)
    }

    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for book in &self.books {
            book.check_invariants()?;
        }
        for (id, handles) in &self.registrations {
            let order = self.orders.get(id).ok_or_else(|| format!("registration for missing order {}", id))?;
            for handle in handles {
                let entry = self.books[handle.0]
                    .get(id)
                    .ok_or_else(|| format!("{} missing from book {}", id, self.books[handle.0].name()))?;
                if *entry != order.entry() {
                    return Err(format!("{} stale in book {}", id, self.books[handle.0].name()));
                }
                if entry.side != order.side() {
                    return Err(format!("{} indexed on the wrong side", id));
                }
            }
        }
        let indexed = self.combined().len();
        if indexed != self.orders.len() {
            return Err(format!("combined book has {} entries for {} orders", indexed, self.orders.len()));
        }
        Ok(())
    }
}
