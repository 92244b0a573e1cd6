//! Orders and their escrow.
//!
//! An [`Order`] withdraws its funding into a private [`Funds`] escrow when it is
//! opened: the quote cost (`price * quantity`) for a buy, the base quantity for a
//! sell. Fills spend escrow through [`Execution`](crate::execution::Execution);
//! cancellations release it back to the owner. Once remaining quantity reaches
//! zero whatever escrow is left (price improvement on buys) goes home.

use crate::account::Ledger;
use crate::error::{Error, Result};
use crate::funds::{Asset, AssetPair, Funds};
use crate::types::{AccountId, BookEntry, OrderId, OrderKind, OrderType, Priority, Side};
use log::debug;
use rust_decimal::Decimal;

/// Everything needed to open an order except its id.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrderRequest {
    pub kind: OrderKind,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price, or the reference price used to size escrow for market orders.
    pub price: Decimal,
    pub quantity: Decimal,
    pub priority: Priority,
    pub account: AccountId,
}

impl OrderRequest {
    pub fn limit(kind: OrderKind, side: Side, price: Decimal, quantity: Decimal, priority: Priority, account: AccountId) -> Self {
        Self {
            kind,
            side,
            order_type: OrderType::Limit,
            price,
            quantity,
            priority,
            account,
        }
    }
}

#[derive(Debug)]
pub struct Order {
    id: OrderId,
    pair: AssetPair,
    side: Side,
    kind: OrderKind,
    order_type: OrderType,
    price: Decimal,
    quantity: Decimal,
    remaining: Decimal,
    priority: Priority,
    account: AccountId,
    escrow: Funds,
    funded: Decimal,
    spent: Decimal,
    released: Decimal,
}

/// Asset an order of `side` escrows, and how much of it `quantity` at `price` needs.
pub fn funding_for(pair: AssetPair, side: Side, price: Decimal, quantity: Decimal) -> (Asset, Decimal) {
    match side {
        Side::Buy => (pair.quote, price * quantity),
        Side::Sell => (pair.base, quantity),
    }
}

impl Order {
    /// Opens an order, withdrawing its funding from `request.account`.
    ///
    /// Fails without side effects if the quantity or price is invalid or the
    /// account cannot fund it.
    pub fn open(id: OrderId, pair: AssetPair, request: &OrderRequest, ledger: &mut Ledger) -> Result<Self> {
        if request.quantity <= Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("order quantity must be positive, got {}", request.quantity)));
        }
        if request.price <= Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("order price must be positive, got {}", request.price)));
        }
        let (asset, amount) = funding_for(pair, request.side, request.price, request.quantity);
        let escrow = ledger.withdraw(request.account, asset, amount)?;
        debug!("order funded order_id={} asset={} amount={}", id, asset, amount);
        Ok(Self {
            id,
            pair,
            side: request.side,
            kind: request.kind,
            order_type: request.order_type,
            price: request.price,
            quantity: request.quantity,
            remaining: request.quantity,
            priority: request.priority,
            account: request.account,
            escrow,
            funded: amount,
            spent: Decimal::ZERO,
            released: Decimal::ZERO,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn pair(&self) -> AssetPair {
        self.pair
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn remaining(&self) -> Decimal {
        self.remaining
    }

    pub fn filled(&self) -> Decimal {
        self.quantity - self.remaining
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn escrow(&self) -> &Funds {
        &self.escrow
    }

    pub fn funding_asset(&self) -> Asset {
        self.escrow.asset()
    }

    pub fn is_done(&self) -> bool {
        self.remaining.is_zero()
    }

    pub fn entry(&self) -> BookEntry {
        BookEntry {
            id: self.id,
            side: self.side,
            kind: self.kind,
            price: self.price,
            remaining: self.remaining,
            priority: self.priority,
            account: self.account,
        }
    }

    /// Takes `amount` of escrow to pay a fill. Caller owns the result.
    pub(crate) fn spend(&mut self, amount: Decimal) -> Result<Funds> {
        let funds = self.escrow.split(amount)?;
        self.spent += amount;
        Ok(funds)
    }

    /// Marks `quantity` as filled; at zero remaining the leftover escrow is released.
    pub(crate) fn fill(&mut self, quantity: Decimal, ledger: &mut Ledger) -> Result<()> {
        if quantity > self.remaining {
            return Err(Error::InvalidOrderState(format!(
                "fill of {} exceeds remaining {} on {}",
                quantity, self.remaining, self.id
            )));
        }
        self.remaining -= quantity;
        if self.remaining.is_zero() {
            self.release_all(ledger)?;
        }
        Ok(())
    }

    /// Fails if [`Order::cancel`] with `quantity` would be refused.
    pub fn check_cancel(&self, quantity: Decimal, ledger: &Ledger) -> Result<()> {
        if quantity < Decimal::ZERO || quantity > self.remaining {
            return Err(Error::InvalidQuantity(format!(
                "cannot cancel {} of {} remaining on {}",
                quantity, self.remaining, self.id
            )));
        }
        if !ledger.can_deposit(self.account) {
            return Err(Error::WalletRejected {
                account: self.account,
                reason: "escrow cannot be returned".into(),
            });
        }
        Ok(())
    }

    /// Cancels `quantity` of the remaining amount and releases its share of escrow.
    /// A refused cancel changes nothing.
    pub fn cancel(&mut self, quantity: Decimal, ledger: &mut Ledger) -> Result<()> {
        self.check_cancel(quantity, ledger)?;
        if quantity.is_zero() {
            return Ok(());
        }
        if quantity == self.remaining {
            self.release_all(ledger)?;
        } else {
            let share = self.escrow.amount() * quantity / self.remaining;
            self.release(share, ledger)?;
        }
        self.remaining -= quantity;
        Ok(())
    }

    /// Sets the remaining quantity. Growing withdraws more funding; shrinking
    /// releases it. Returns whether anything changed.
    pub fn resize(&mut self, remaining: Decimal, ledger: &mut Ledger) -> Result<bool> {
        if remaining < Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("remaining quantity cannot be negative, got {}", remaining)));
        }
        if remaining == self.remaining {
            return Ok(false);
        }
        if remaining < self.remaining {
            self.cancel(self.remaining - remaining, ledger)?;
            return Ok(true);
        }
        let extra = remaining - self.remaining;
        let (asset, amount) = funding_for(self.pair, self.side, self.price, extra);
        let topup = ledger.withdraw(self.account, asset, amount)?;
        self.escrow.merge(topup)?;
        self.funded += amount;
        self.quantity += extra;
        self.remaining = remaining;
        Ok(true)
    }

    /// Moves the order to a new price. Buys re-fund escrow to `price * remaining`.
    pub fn reprice(&mut self, price: Decimal, ledger: &mut Ledger) -> Result<bool> {
        if price <= Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("order price must be positive, got {}", price)));
        }
        if price == self.price {
            return Ok(false);
        }
        if self.side == Side::Buy {
            let needed = price * self.remaining;
            let held = self.escrow.amount();
            if needed > held {
                let topup = ledger.withdraw(self.account, self.pair.quote, needed - held)?;
                self.funded += topup.amount();
                self.escrow.merge(topup)?;
            } else {
                self.release(held - needed, ledger)?;
            }
        }
        self.price = price;
        Ok(true)
    }

    pub fn set_priority(&mut self, priority: Priority) -> bool {
        if priority == self.priority {
            return false;
        }
        self.priority = priority;
        true
    }

    /// Cancels everything left and returns the escrow.
    pub fn close(&mut self, ledger: &mut Ledger) -> Result<()> {
        self.release_all(ledger)?;
        self.remaining = Decimal::ZERO;
        Ok(())
    }

    fn release_all(&mut self, ledger: &mut Ledger) -> Result<()> {
        let amount = self.escrow.amount();
        self.release(amount, ledger)
    }

    fn release(&mut self, amount: Decimal, ledger: &mut Ledger) -> Result<()> {
        // Never hand back more than was withdrawn.
        let ceiling = self.funded - self.spent - self.released;
        let amount = amount.min(self.escrow.amount()).min(ceiling);
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let mut funds = self.escrow.split(amount)?;
        if let Err(e) = ledger.deposit(self.account, &mut funds) {
            self.escrow.merge(funds)?;
            return Err(e);
        }
        self.released += amount;
        debug_assert!(
            self.spent + self.released <= self.funded,
            "escrow over-released on {}",
            self.id
        );
        debug!("escrow released order_id={} amount={} remaining={}", self.id, amount, self.remaining);
        Ok(())
    }
}
