//! Ghost-order reconciliation.
//!
//! The public feed only shows aggregate depth per level, so when a sweep of
//! prints walks through levels where synthetic orders rest, nothing says whose
//! liquidity was taken. [`Reconciler::reconcile`] decides which synthetic orders
//! the sweep must have filled and materializes the public liquidity that must
//! still be resting as ghost orders.
//!
//! Reluctant mode, with `Q` the sweep's total quantity, walking levels (every
//! print price and every synthetic price at or inside the worst print) from best
//! to worst:
//!
//! 1. A level is covered when `Q` is at least its traded quantity plus its
//!    synthetic quantity. Its synthetic orders fill in full and `Q` shrinks by
//!    that amount.
//! 2. The first uncovered level is final. Absolute-priority synthetics there
//!    fill first from `Q`.
//! 3. A drawn impediment factor `f` puts `min(Q * f, traded)` of public
//!    liquidity ahead of the regular synthetics, which then fill in price-time
//!    order from what is left. Any `Q` still left also came out of public
//!    liquidity.
//! 4. The level's traded quantity not attributed to public liquidity is
//!    re-emitted as two ghosts split by a fresh draw: `f` of it at absolute
//!    priority, the rest at the sweep's timestamp.
//! 5. Every later level with prints gets the same ghost pair, sized from its
//!    whole traded quantity.
//!
//! Aggressive-limited mode fills every synthetic order at or inside the worst
//! print and creates no ghosts.

use crate::error::{Error, Result};
use crate::execution::Execution;
use crate::market::Market;
use crate::order::OrderRequest;
use crate::trade::Trade;
use crate::types::{BookEntry, OrderId, OrderKind, Priority, Side};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// How synthetic orders inside a sweep are treated.
///
/// Only `Reluctant` and `AggressiveLimited` are implemented; the others are
/// reserved names and fail [`Reconciler::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationMode {
    Reluctant,
    AggressiveBounded,
    AggressiveLimited,
    MidpointBounded,
    MidpointLimited,
}

impl ReconciliationMode {
    pub fn is_supported(self) -> bool {
        matches!(self, ReconciliationMode::Reluctant | ReconciliationMode::AggressiveLimited)
    }
}

impl fmt::Display for ReconciliationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconciliationMode::Reluctant => "reluctant",
            ReconciliationMode::AggressiveBounded => "aggressive_bounded",
            ReconciliationMode::AggressiveLimited => "aggressive_limited",
            ReconciliationMode::MidpointBounded => "midpoint_bounded",
            ReconciliationMode::MidpointLimited => "midpoint_limited",
        })
    }
}

impl FromStr for ReconciliationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "reluctant" => Ok(ReconciliationMode::Reluctant),
            "aggressive_bounded" => Ok(ReconciliationMode::AggressiveBounded),
            "aggressive_limited" | "aggressive" => Ok(ReconciliationMode::AggressiveLimited),
            "midpoint_bounded" => Ok(ReconciliationMode::MidpointBounded),
            "midpoint_limited" => Ok(ReconciliationMode::MidpointLimited),
            other => Err(Error::Configuration(format!("unknown reconciliation mode {:?}", other))),
        }
    }
}

/// Source of impediment factors, drawn once per use.
pub trait ImpedimentModel {
    fn next_factor(&mut self) -> Decimal;
}

impl<F: FnMut() -> Decimal> ImpedimentModel for F {
    fn next_factor(&mut self) -> Decimal {
        self()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedImpediment(pub Decimal);

impl ImpedimentModel for FixedImpediment {
    fn next_factor(&mut self) -> Decimal {
        self.0
    }
}

/// Replays `values` in order, then `fallback` forever.
#[derive(Clone, Debug)]
pub struct SequenceImpediment {
    values: VecDeque<Decimal>,
    fallback: Decimal,
}

impl SequenceImpediment {
    pub fn new(values: impl IntoIterator<Item = Decimal>, fallback: Decimal) -> Self {
        Self {
            values: values.into_iter().collect(),
            fallback,
        }
    }
}

impl ImpedimentModel for SequenceImpediment {
    fn next_factor(&mut self) -> Decimal {
        self.values.pop_front().unwrap_or(self.fallback)
    }
}

/// Uniform draws in `[min, max]` at basis-point resolution, seeded.
#[derive(Debug)]
pub struct RandomImpediment {
    rng: StdRng,
    min_bps: i64,
    max_bps: i64,
}

fn to_bps(factor: Decimal) -> Result<i64> {
    (factor * Decimal::from(10_000))
        .round()
        .to_i64()
        .ok_or_else(|| Error::Configuration(format!("impediment factor {} out of range", factor)))
}

impl RandomImpediment {
    pub fn new(seed: u64, min: Decimal, max: Decimal) -> Result<Self> {
        check_factor(min)?;
        check_factor(max)?;
        if min > max {
            return Err(Error::Configuration(format!("impediment range min {} exceeds max {}", min, max)));
        }
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            min_bps: to_bps(min)?,
            max_bps: to_bps(max)?,
        })
    }
}

impl ImpedimentModel for RandomImpediment {
    fn next_factor(&mut self) -> Decimal {
        Decimal::new(self.rng.gen_range(self.min_bps..=self.max_bps), 4)
    }
}

pub(crate) fn check_factor(factor: Decimal) -> Result<()> {
    if factor < Decimal::ZERO || factor > Decimal::ONE {
        return Err(Error::Configuration(format!("impediment factor must be within [0, 1], got {}", factor)));
    }
    Ok(())
}

/// A ghost order created by reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct GhostEmission {
    pub id: OrderId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub priority: Priority,
}

/// What one sweep did to the book.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    pub side: Option<Side>,
    pub traded: Decimal,
    pub worst_price: Option<Decimal>,
    pub final_level: Option<Decimal>,
    pub fills: Vec<Execution>,
    pub ghosts: Vec<GhostEmission>,
}

impl Reconciliation {
    fn empty() -> Self {
        Self {
            side: None,
            traded: Decimal::ZERO,
            worst_price: None,
            final_level: None,
            fills: Vec::new(),
            ghosts: Vec::new(),
        }
    }
}

pub struct Reconciler {
    mode: ReconciliationMode,
    model: Box<dyn ImpedimentModel>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler").field("mode", &self.mode).finish()
    }
}

/// One price level of a sweep: its prints and the synthetic orders resting there.
struct Level {
    price: Decimal,
    traded: Decimal,
    resting: Vec<BookEntry>,
}

impl Level {
    fn synthetic(&self) -> Decimal {
        self.resting.iter().map(|e| e.remaining).sum()
    }
}

impl Reconciler {
    pub fn new(mode: ReconciliationMode, model: impl ImpedimentModel + 'static) -> Result<Self> {
        Self::boxed(mode, Box::new(model))
    }

    pub fn boxed(mode: ReconciliationMode, model: Box<dyn ImpedimentModel>) -> Result<Self> {
        if !mode.is_supported() {
            return Err(Error::Configuration(format!("reconciliation mode {} is not implemented", mode)));
        }
        Ok(Self { mode, model })
    }

    pub fn mode(&self) -> ReconciliationMode {
        self.mode
    }

    fn draw(&mut self) -> Result<Decimal> {
        let factor = self.model.next_factor();
        check_factor(factor)?;
        Ok(factor)
    }

    /// Applies one sweep to `market`. The batch must be same-side and never
    /// move inward; an empty batch is a no-op.
    ///
    /// Every impediment factor is drawn and every fill is checked before the
    /// first change, so an error leaves the market as it was.
    pub fn reconcile(&mut self, market: &mut Market, trades: &[Trade]) -> Result<Reconciliation> {
        let (Some(first), Some(last)) = (trades.first(), trades.last()) else {
            return Ok(Reconciliation::empty());
        };
        let side = first.side;
        validate_sweep(side, trades)?;
        let worst = last.price;
        let timestamp = last.timestamp;
        let traded: Decimal = trades.iter().map(|t| t.quantity).sum();

        let synthetic: Vec<BookEntry> = market
            .combined()
            .side(side)
            .until(worst)
            .into_iter()
            .filter(|e| e.kind.is_synthetic())
            .collect();

        let plan = match self.mode {
            ReconciliationMode::AggressiveLimited => {
                let mut plan = Plan::default();
                for entry in &synthetic {
                    plan.fill(entry, entry.remaining);
                }
                plan
            }
            _ => self.plan_reluctant(side, trades, traded, synthetic, timestamp)?,
        };
        for (id, quantity) in &plan.fills {
            market.check_ghost_fill(id, *quantity)?;
        }

        let mut outcome = Reconciliation {
            side: Some(side),
            traded,
            worst_price: Some(worst),
            final_level: plan.final_level,
            ..Reconciliation::empty()
        };
        for (id, quantity) in plan.fills {
            let execution = market.execute_against_ghost(&id, quantity, timestamp)?;
            outcome.fills.push(execution);
        }
        let account = market.ghost_account();
        for (price, quantity, priority) in plan.ghosts {
            let id = market.place(OrderRequest::limit(OrderKind::Ghost, side, price, quantity, priority, account))?;
            outcome.ghosts.push(GhostEmission {
                id,
                price,
                quantity,
                priority,
            });
        }

        info!(
            "sweep reconciled side={} traded={} worst={} final_level={:?} fills={} ghosts={}",
            side,
            traded,
            worst,
            outcome.final_level,
            outcome.fills.len(),
            outcome.ghosts.len()
        );
        Ok(outcome)
    }

    fn plan_reluctant(
        &mut self,
        side: Side,
        trades: &[Trade],
        traded: Decimal,
        synthetic: Vec<BookEntry>,
        timestamp: u64,
    ) -> Result<Plan> {
        let levels = levels(side, trades, synthetic);
        let mut plan = Plan::default();
        let mut left = traded;

        let mut final_index = None;
        for (i, level) in levels.iter().enumerate() {
            let need = level.traded + level.synthetic();
            if left < need {
                final_index = Some(i);
                break;
            }
            for entry in &level.resting {
                plan.fill(entry, entry.remaining);
            }
            left -= need;
            debug!("level covered price={} consumed={} left={}", level.price, need, left);
        }
        let Some(final_index) = final_index else {
            return Ok(plan);
        };

        let level = &levels[final_index];
        plan.final_level = Some(level.price);
        for entry in level.resting.iter().filter(|e| e.priority.is_absolute()) {
            left -= plan.fill(entry, left);
        }

        let factor = self.draw()?;
        let impeding = (left * factor).min(level.traded);
        left -= impeding;
        let mut public = impeding;

        for entry in level.resting.iter().filter(|e| !e.priority.is_absolute()) {
            left -= plan.fill(entry, left);
        }
        public += left.min(level.traded - public);
        debug!(
            "final level price={} impediment={} public_consumed={}",
            level.price, factor, public
        );

        self.plan_pair(&mut plan, level.price, level.traded - public, timestamp)?;
        for later in &levels[final_index + 1..] {
            self.plan_pair(&mut plan, later.price, later.traded, timestamp)?;
        }
        Ok(plan)
    }

    /// Splits `quantity` at `price` into an absolute-priority ghost and one at
    /// the sweep's timestamp.
    fn plan_pair(&mut self, plan: &mut Plan, price: Decimal, quantity: Decimal, timestamp: u64) -> Result<()> {
        if quantity <= Decimal::ZERO {
            return Ok(());
        }
        let factor = self.draw()?;
        let prioritized = quantity * factor;
        let regular = quantity - prioritized;
        for (qty, priority) in [(prioritized, Priority::Absolute), (regular, Priority::At(timestamp))] {
            if qty > Decimal::ZERO {
                plan.ghosts.push((price, qty, priority));
            }
        }
        Ok(())
    }
}

/// What a sweep will do, decided before the market is touched.
#[derive(Debug, Default)]
struct Plan {
    fills: Vec<(OrderId, Decimal)>,
    ghosts: Vec<(Decimal, Decimal, Priority)>,
    final_level: Option<Decimal>,
}

impl Plan {
    /// Plans up to `budget` of `entry` against the ghost counterparty. Returns
    /// the quantity planned.
    fn fill(&mut self, entry: &BookEntry, budget: Decimal) -> Decimal {
        let quantity = budget.min(entry.remaining);
        if quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.fills.push((entry.id, quantity));
        quantity
    }
}

fn validate_sweep(side: Side, trades: &[Trade]) -> Result<()> {
    for trade in trades {
        if trade.side != side {
            return Err(Error::InvalidSweep(format!("mixed sides {} and {} in one batch", side, trade.side)));
        }
        if trade.quantity <= Decimal::ZERO {
            return Err(Error::InvalidSweep(format!("non-positive print quantity {}", trade.quantity)));
        }
        if trade.price <= Decimal::ZERO {
            return Err(Error::InvalidSweep(format!("non-positive print price {}", trade.price)));
        }
    }
    for pair in trades.windows(2) {
        if side.better(pair[1].price, pair[0].price) {
            return Err(Error::InvalidSweep(format!(
                "print at {} moves inward from {}",
                pair[1].price, pair[0].price
            )));
        }
    }
    Ok(())
}

/// Distinct prices from prints and synthetic orders, best first.
fn levels(side: Side, trades: &[Trade], synthetic: Vec<BookEntry>) -> Vec<Level> {
    let mut prices: Vec<Decimal> = trades
        .iter()
        .map(|t| t.price)
        .chain(synthetic.iter().map(|e| e.price))
        .collect();
    prices.sort();
    if side == Side::Buy {
        prices.reverse();
    }
    prices.dedup();

    let mut resting = synthetic.into_iter().peekable();
    prices
        .into_iter()
        .map(|price| {
            let traded = trades.iter().filter(|t| t.price == price).map(|t| t.quantity).sum();
            let mut here = Vec::new();
            while let Some(entry) = resting.next_if(|e| e.price == price) {
                here.push(entry);
            }
            Level {
                price,
                traded,
                resting: here,
            }
        })
        .collect()
}
