//! Executions: the atomic transfer between a matched buy and sell.
//!
//! An [`Execution`] is created `Pending` and moves to `Completed` exactly once.
//! All preconditions are checked before any escrow moves, so a failed execute
//! leaves both orders and both accounts as they were.

use crate::account::Ledger;
use crate::error::{Error, Result};
use crate::order::Order;
use crate::types::{ExecutionId, OrderId, Side};
use log::debug;
use rust_decimal::Decimal;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Execution {
    id: ExecutionId,
    buy_order: OrderId,
    sell_order: OrderId,
    price: Decimal,
    quantity: Decimal,
    timestamp: u64,
    status: ExecutionStatus,
}

impl Execution {
    pub fn new(id: ExecutionId, buy_order: OrderId, sell_order: OrderId, price: Decimal, quantity: Decimal, timestamp: u64) -> Self {
        Self {
            id,
            buy_order,
            sell_order,
            price,
            quantity,
            timestamp,
            status: ExecutionStatus::Pending,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn buy_order(&self) -> OrderId {
        self.buy_order
    }

    pub fn sell_order(&self) -> OrderId {
        self.sell_order
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Quote paid by the buyer.
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    pub fn cancel(&mut self) -> Result<()> {
        if self.status != ExecutionStatus::Pending {
            return Err(Error::InvalidOrderState(format!(
                "cannot cancel execution {} in state {:?}",
                self.id.0, self.status
            )));
        }
        self.status = ExecutionStatus::Cancelled;
        Ok(())
    }

    /// Moves the buyer's quote to the seller and the seller's base to the buyer,
    /// then marks both orders down by the execution quantity.
    pub fn execute(&mut self, buy: &mut Order, sell: &mut Order, ledger: &mut Ledger) -> Result<()> {
        self.check(buy, sell, ledger)?;

        let mut quote = buy.spend(self.notional())?;
        let mut base = match sell.spend(self.quantity) {
            Ok(base) => base,
            Err(e) => {
                // check() makes this unreachable; keep the quote from vanishing anyway.
                ledger.deposit(buy.account(), &mut quote)?;
                return Err(e);
            }
        };
        ledger.deposit(sell.account(), &mut quote)?;
        ledger.deposit(buy.account(), &mut base)?;

        buy.fill(self.quantity, ledger)?;
        sell.fill(self.quantity, ledger)?;
        self.status = ExecutionStatus::Completed;
        debug!(
            "execution completed exec_id={} buy={} sell={} price={} quantity={}",
            self.id.0, self.buy_order, self.sell_order, self.price, self.quantity
        );
        Ok(())
    }

    fn check(&self, buy: &Order, sell: &Order, ledger: &Ledger) -> Result<()> {
        if self.status != ExecutionStatus::Pending {
            return Err(Error::InvalidOrderState(format!(
                "execution {} is {:?}, not pending",
                self.id.0, self.status
            )));
        }
        if buy.id() != self.buy_order || sell.id() != self.sell_order {
            return Err(Error::InvalidOrderState(format!(
                "execution {} is for {}/{}, got {}/{}",
                self.id.0,
                self.buy_order,
                self.sell_order,
                buy.id(),
                sell.id()
            )));
        }
        if buy.side() != Side::Buy || sell.side() != Side::Sell {
            return Err(Error::InvalidOrderState(format!("execution {} legs are on the wrong sides", self.id.0)));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("execution quantity must be positive, got {}", self.quantity)));
        }
        for order in [buy, sell] {
            if order.remaining() < self.quantity {
                return Err(Error::InvalidOrderState(format!(
                    "{} has {} remaining, execution needs {}",
                    order.id(),
                    order.remaining(),
                    self.quantity
                )));
            }
            if !ledger.can_deposit(order.account()) {
                return Err(Error::WalletRejected {
                    account: order.account(),
                    reason: "counterparty cannot receive funds".into(),
                });
            }
        }
        let cost = self.notional();
        if buy.escrow().amount() < cost {
            return Err(Error::InsufficientFunds {
                asset: buy.funding_asset(),
                requested: cost,
                available: buy.escrow().amount(),
            });
        }
        if sell.escrow().amount() < self.quantity {
            return Err(Error::InsufficientFunds {
                asset: sell.funding_asset(),
                requested: self.quantity,
                available: sell.escrow().amount(),
            });
        }
        Ok(())
    }
}
