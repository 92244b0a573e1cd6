//! Price-time priority matching for synthetic orders.
//!
//! [`match_order`] walks the opposite side of the combined book from the best
//! price outward until the incoming order is done or the next resting order
//! no longer crosses its limit. A resting paper order belongs to the strategy,
//! so crossing it is a mutual cancellation; feed and ghost liquidity executes at
//! the resting price.
//!
//! A failing step never propagates: it is logged, the incoming remainder is
//! cancelled if it would otherwise rest crossed (market orders always), and the
//! walk stops. Only an unknown incoming order is an error.

use crate::error::{Error, Result};
use crate::execution::Execution;
use crate::market::{Market, COMBINED};
use crate::types::{BookEntry, OrderId, OrderKind, Side};
use log::{debug, info, warn};
use rust_decimal::Decimal;

/// Lifecycle of one incoming order through the matcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatchState {
    Received,
    Matching,
    /// Some quantity executed; the remainder rests or was cancelled.
    PartiallyFilled,
    Filled,
    /// Nothing executed; the order rests in full.
    Resting,
    /// Nothing executed and nothing rests.
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchReport {
    pub order_id: OrderId,
    pub state: MatchState,
    pub executions: Vec<Execution>,
    pub filled: Decimal,
    /// Quantity removed without executing: self-trade cancels and dropped remainders.
    pub cancelled: Decimal,
    pub resting: Decimal,
}

impl MatchReport {
    fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            state: MatchState::Received,
            executions: Vec::new(),
            filled: Decimal::ZERO,
            cancelled: Decimal::ZERO,
            resting: Decimal::ZERO,
        }
    }

    fn transition(&mut self, state: MatchState) {
        debug!("match state order_id={} from={:?} to={:?}", self.order_id, self.state, state);
        self.state = state;
    }
}

fn crosses(side: Side, limit: Decimal, resting_price: Decimal) -> bool {
    side.better_or_equal(limit, resting_price)
}

/// Matches an order already stored in `market` against the combined book.
pub fn match_order(market: &mut Market, id: &OrderId, timestamp: u64) -> Result<MatchReport> {
    let order = market.order(id).ok_or(Error::UnknownOrder(*id))?;
    let side = order.side();
    let limit = order.price();
    let is_market = order.is_market();
    let mut report = MatchReport::new(*id);
    report.transition(MatchState::Matching);

    let opposite = market.book(COMBINED).side(side.opposite());
    let window: Vec<BookEntry> = if is_market {
        opposite.iter().cloned().collect()
    } else {
        opposite.until(limit)
    };

    for resting in window {
        let Some(remaining) = market.order(id).map(|o| o.remaining()) else {
            break;
        };
        let Some(available) = market.order(&resting.id).map(|o| o.remaining()) else {
            warn!("resting order vanished mid-walk order_id={} resting={}", id, resting.id);
            continue;
        };
        let quantity = remaining.min(available);
        if quantity <= Decimal::ZERO {
            warn!("skipping empty resting order order_id={} resting={}", id, resting.id);
            continue;
        }

        let step = if resting.kind == OrderKind::Paper {
            self_cancel(market, id, &resting.id, quantity).map(|()| report.cancelled += quantity)
        } else {
            let (buy, sell) = match side {
                Side::Buy => (*id, resting.id),
                Side::Sell => (resting.id, *id),
            };
            let mut execution = market.new_execution(buy, sell, resting.price, quantity, timestamp);
            match market.execute(&mut execution) {
                Ok(()) => {
                    report.filled += quantity;
                    report.executions.push(execution);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = step {
            warn!(
                "matching step failed order_id={} resting={} price={} error={}",
                id, resting.id, resting.price, e
            );
            if is_market || crosses(side, limit, resting.price) {
                report.cancelled += cancel_remainder(market, id);
            }
            break;
        }
    }

    if is_market {
        report.cancelled += cancel_remainder(market, id);
    }

    report.resting = market.order(id).map(|o| o.remaining()).unwrap_or(Decimal::ZERO);
    let state = match (report.filled.is_zero(), report.resting.is_zero()) {
        (true, true) => MatchState::Cancelled,
        (true, false) => MatchState::Resting,
        (false, true) if report.cancelled.is_zero() => MatchState::Filled,
        (false, _) => MatchState::PartiallyFilled,
    };
    report.transition(state);
    info!(
        "match complete order_id={} state={:?} executions={} filled={} cancelled={} resting={}",
        id,
        report.state,
        report.executions.len(),
        report.filled,
        report.cancelled,
        report.resting
    );
    Ok(report)
}

/// Self-trade prevention: both sides lose `quantity` and no funds change hands.
/// Both cancels are validated first, so a refusal leaves both orders as they were.
fn self_cancel(market: &mut Market, incoming: &OrderId, resting: &OrderId, quantity: Decimal) -> Result<()> {
    market.check_cancel(resting, quantity)?;
    market.check_cancel(incoming, quantity)?;
    market.cancel_quantity(resting, quantity)?;
    market.cancel_quantity(incoming, quantity)?;
    debug!("self-trade cancelled incoming={} resting={} quantity={}", incoming, resting, quantity);
    Ok(())
}

fn cancel_remainder(market: &mut Market, id: &OrderId) -> Decimal {
    if market.order(id).is_none() {
        return Decimal::ZERO;
    }
    match market.cancel(id) {
        Ok(quantity) => quantity,
        Err(e) => {
            warn!("remainder cancel failed order_id={} error={}", id, e);
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountPolicy};
    use crate::funds::{Asset, AssetPair};
    use crate::market::FeedLevel;
    use crate::order::OrderRequest;
    use crate::types::{AccountId, OrderKind, OrderType, Priority};

    fn init_log() {
        let _ = env_logger::try_init();
    }

    fn setup() -> (Market, AccountId) {
        let mut market = Market::new(AssetPair::default());
        let a = market.open_account("strategy");
        market.credit(a, Asset::Usd, Decimal::from(100_000)).unwrap();
        market.credit(a, Asset::Btc, Decimal::from(100)).unwrap();
        (market, a)
    }

    fn level(market: &mut Market, side: Side, price: i64, qty: i64) -> OrderId {
        market
            .apply_level(FeedLevel {
                side,
                price: Decimal::from(price),
                quantity: Decimal::from(qty),
                timestamp: 1,
            })
            .unwrap();
        OrderId::feed(side, Decimal::from(price))
    }

    fn paper(market: &mut Market, a: AccountId, side: Side, price: i64, qty: i64, ts: u64) -> OrderId {
        market
            .place(OrderRequest::limit(OrderKind::Paper, side, Decimal::from(price), Decimal::from(qty), Priority::At(ts), a))
            .unwrap()
    }

    #[test]
    fn marketable_buy_fills_single_ask() {
        init_log();
        let (mut market, a) = setup();
        let ask = level(&mut market, Side::Sell, 100, 5);
        let buy = paper(&mut market, a, Side::Buy, 100, 5, 2);
        let report = match_order(&mut market, &buy, 2).unwrap();
        assert_eq!(report.state, MatchState::Filled);
        assert_eq!(report.executions.len(), 1);
        assert_eq!(report.executions[0].quantity(), Decimal::from(5));
        assert_eq!(report.executions[0].price(), Decimal::from(100));
        assert!(market.order(&ask).is_none());
        assert!(market.combined().best_ask().is_none());
        market.check_invariants().unwrap();
    }

    #[test]
    fn synthetic_cross_is_mutual_cancel() {
        init_log();
        let (mut market, a) = setup();
        let sell = paper(&mut market, a, Side::Sell, 100, 5, 1);
        let buy = paper(&mut market, a, Side::Buy, 101, 3, 2);
        let report = match_order(&mut market, &buy, 2).unwrap();
        assert!(report.executions.is_empty());
        assert_eq!(report.state, MatchState::Cancelled);
        assert!(market.order(&buy).is_none());
        assert_eq!(market.order(&sell).map(|o| o.remaining()), Some(Decimal::from(2)));
        assert_eq!(market.combined().best_ask(), Some(Decimal::from(100)));
        assert_eq!(market.balance(a, Asset::Usd).unwrap(), Decimal::from(100_000));
    }

    #[test]
    fn paper_order_executes_against_ghost_liquidity() {
        init_log();
        let (mut market, a) = setup();
        let ghost_account = market.ghost_account();
        let ghost = market
            .place(OrderRequest::limit(
                OrderKind::Ghost,
                Side::Sell,
                Decimal::from(100),
                Decimal::from(2),
                Priority::Absolute,
                ghost_account,
            ))
            .unwrap();
        let buy = paper(&mut market, a, Side::Buy, 100, 1, 2);
        let report = match_order(&mut market, &buy, 2).unwrap();
        assert_eq!(report.state, MatchState::Filled);
        assert_eq!(report.cancelled, Decimal::ZERO);
        assert_eq!(report.executions.len(), 1);
        assert_eq!(report.executions[0].sell_order(), ghost);
        assert_eq!(report.executions[0].price(), Decimal::from(100));
        assert_eq!(market.order(&ghost).map(|o| o.remaining()), Some(Decimal::ONE));
        assert_eq!(market.balance(a, Asset::Btc).unwrap(), Decimal::from(101));
        assert_eq!(market.balance(a, Asset::Usd).unwrap(), Decimal::from(99_900));
        market.check_invariants().unwrap();
    }

    #[test]
    fn refused_self_trade_cancels_neither_order() {
        init_log();
        let (mut market, a) = setup();
        let b = market.open_account("second");
        market.credit(b, Asset::Usd, Decimal::from(1_000)).unwrap();
        let sell = paper(&mut market, a, Side::Sell, 100, 5, 1);
        let buy = paper(&mut market, b, Side::Buy, 100, 3, 2);
        // The buyer can no longer take its escrow back, so its leg of the cancel is refused.
        *market.ledger_mut().account_mut(b).unwrap() = Account::new(b, "frozen", AccountPolicy::Null);

        let report = match_order(&mut market, &buy, 2).unwrap();
        assert!(report.executions.is_empty());
        assert_eq!(report.cancelled, Decimal::ZERO);
        assert_eq!(report.state, MatchState::Resting);
        assert_eq!(market.order(&sell).map(|o| o.remaining()), Some(Decimal::from(5)));
        assert_eq!(market.order(&sell).map(|o| o.escrow().amount()), Some(Decimal::from(5)));
        assert_eq!(market.order(&buy).map(|o| o.remaining()), Some(Decimal::from(3)));
        assert_eq!(market.order(&buy).map(|o| o.escrow().amount()), Some(Decimal::from(300)));
        market.check_invariants().unwrap();
    }

    #[test]
    fn walks_levels_in_price_order_and_rests_remainder() {
        init_log();
        let (mut market, a) = setup();
        level(&mut market, Side::Sell, 102, 2);
        level(&mut market, Side::Sell, 101, 1);
        level(&mut market, Side::Sell, 105, 4);
        let buy = paper(&mut market, a, Side::Buy, 103, 6, 2);
        let report = match_order(&mut market, &buy, 2).unwrap();
        let prices: Vec<Decimal> = report.executions.iter().map(|e| e.price()).collect();
        assert_eq!(prices, vec![Decimal::from(101), Decimal::from(102)]);
        assert_eq!(report.state, MatchState::PartiallyFilled);
        assert_eq!(report.resting, Decimal::from(3));
        assert_eq!(market.combined().best_bid(), Some(Decimal::from(103)));
        assert_eq!(market.combined().best_ask(), Some(Decimal::from(105)));
        market.check_invariants().unwrap();
    }

    #[test]
    fn non_crossing_order_rests() {
        init_log();
        let (mut market, a) = setup();
        level(&mut market, Side::Buy, 99, 5);
        let sell = paper(&mut market, a, Side::Sell, 100, 1, 2);
        let report = match_order(&mut market, &sell, 2).unwrap();
        assert_eq!(report.state, MatchState::Resting);
        assert!(market.order(&sell).is_some());
    }

    #[test]
    fn market_order_remainder_is_cancelled() {
        init_log();
        let (mut market, a) = setup();
        level(&mut market, Side::Buy, 99, 2);
        let id = market
            .place(OrderRequest {
                kind: OrderKind::Paper,
                side: Side::Sell,
                order_type: OrderType::Market,
                price: Decimal::from(99),
                quantity: Decimal::from(5),
                priority: Priority::At(2),
                account: a,
            })
            .unwrap();
        let report = match_order(&mut market, &id, 2).unwrap();
        assert_eq!(report.filled, Decimal::from(2));
        assert_eq!(report.cancelled, Decimal::from(3));
        assert_eq!(report.state, MatchState::PartiallyFilled);
        assert!(market.order(&id).is_none());
        assert_eq!(market.balance(a, Asset::Btc).unwrap(), Decimal::from(98));
    }

    #[test]
    fn underfunded_market_buy_fails_the_unit_only() {
        init_log();
        let (mut market, a) = setup();
        level(&mut market, Side::Sell, 100, 1);
        level(&mut market, Side::Sell, 120, 5);
        let id = market
            .place(OrderRequest {
                kind: OrderKind::Paper,
                side: Side::Buy,
                order_type: OrderType::Market,
                price: Decimal::from(100),
                quantity: Decimal::from(3),
                priority: Priority::At(2),
                account: a,
            })
            .unwrap();
        let report = match_order(&mut market, &id, 2).unwrap();
        assert_eq!(report.filled, Decimal::ONE);
        assert_eq!(report.cancelled, Decimal::from(2));
        assert!(market.order(&id).is_none());
        assert_eq!(market.balance(a, Asset::Usd).unwrap(), Decimal::from(99_900));

        let next = paper(&mut market, a, Side::Buy, 120, 1, 3);
        let report = match_order(&mut market, &next, 3).unwrap();
        assert_eq!(report.state, MatchState::Filled);
        market.check_invariants().unwrap();
    }

    #[test]
    fn unknown_order_is_an_error() {
        let (mut market, _) = setup();
        let ghost = OrderId::feed(Side::Buy, Decimal::ONE);
        assert_eq!(match_order(&mut market, &ghost, 0), Err(Error::UnknownOrder(ghost)));
    }
}
