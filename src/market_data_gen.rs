//! Synthetic market data generator.
//!
//! Deterministic, configurable stream of feed events (L2 level updates, trade
//! sweeps, paper orders) for replay tests, demos, and benchmarks.
//! Same config and seed produce the same stream.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::exchange::{PaperExchange, PaperOrder};
use crate::market::FeedLevel;
use crate::trade::Trade;
use crate::types::{AccountId, OrderType, Side};

/// One normalized event from the outside world.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum FeedEvent {
    Level(FeedLevel),
    Trade(Trade),
    /// A strategy order; the replaying account is filled in at submit time.
    Paper {
        side: Side,
        order_type: OrderType,
        price: Decimal,
        quantity: Decimal,
        timestamp: u64,
    },
}

/// Generator configuration. All ranges are inclusive.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub seed: u64,
    /// Number of events returned by [`Generator::all_events`].
    pub num_events: usize,
    /// Starting mid price, whole quote units.
    pub mid: i64,
    /// Mid never leaves this band.
    pub price_min: i64,
    pub price_max: i64,
    /// Levels quoted on each side of mid.
    pub depth: i64,
    /// Probability of a level update; then of a trade sweep; paper order otherwise.
    pub level_ratio: f64,
    pub sweep_ratio: f64,
    /// Probability a level update empties the level.
    pub removal_ratio: f64,
    pub quantity_min: u64,
    pub quantity_max: u64,
    /// Prints per sweep.
    pub sweep_prints_max: u64,
    /// Probability a paper order is a limit order.
    pub limit_ratio: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_events: 1000,
            mid: 100,
            price_min: 90,
            price_max: 110,
            depth: 5,
            level_ratio: 0.6,
            sweep_ratio: 0.2,
            removal_ratio: 0.1,
            quantity_min: 1,
            quantity_max: 20,
            sweep_prints_max: 4,
            limit_ratio: 0.9,
        }
    }
}

/// Deterministic event stream. Create with [`Generator::new`].
pub struct Generator {
    rng: StdRng,
    config: GeneratorConfig,
    mid: i64,
    timestamp: u64,
    queued: VecDeque<FeedEvent>,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            mid: config.mid,
            config,
            timestamp: 1,
            queued: VecDeque::new(),
        }
    }

    fn side(&mut self) -> Side {
        if self.rng.gen_bool(0.5) {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    fn quantity(&mut self) -> Decimal {
        let (lo, hi) = (self.config.quantity_min, self.config.quantity_max.max(self.config.quantity_min));
        Decimal::from(self.rng.gen_range(lo..=hi))
    }

    fn drift(&mut self) {
        let step: i64 = self.rng.gen_range(-1..=1);
        self.mid = (self.mid + step).clamp(self.config.price_min, self.config.price_max);
    }

    /// Next event. Sweeps are emitted print by print on consecutive calls.
    pub fn next_event(&mut self) -> FeedEvent {
        if let Some(event) = self.queued.pop_front() {
            return event;
        }
        self.timestamp += 1;
        self.drift();
        let roll: f64 = self.rng.gen();
        if roll < self.config.level_ratio {
            self.level()
        } else if roll < self.config.level_ratio + self.config.sweep_ratio {
            self.sweep();
            self.next_event()
        } else {
            self.paper()
        }
    }

    fn level(&mut self) -> FeedEvent {
        let side = self.side();
        let offset = self.rng.gen_range(1..=self.config.depth.max(1));
        let price = match side {
            Side::Buy => self.mid - offset,
            Side::Sell => self.mid + offset,
        };
        let quantity = if self.rng.gen_bool(self.config.removal_ratio) {
            Decimal::ZERO
        } else {
            self.quantity()
        };
        FeedEvent::Level(FeedLevel {
            side,
            price: Decimal::from(price.max(1)),
            quantity,
            timestamp: self.timestamp,
        })
    }

    fn sweep(&mut self) {
        let side = self.side();
        let prints = self.rng.gen_range(1..=self.config.sweep_prints_max.max(1));
        let mut price = match side {
            Side::Buy => self.mid - 1,
            Side::Sell => self.mid + 1,
        };
        for _ in 0..prints {
            let quantity = self.quantity();
            self.queued.push_back(FeedEvent::Trade(Trade::new(
                side,
                Decimal::from(price.max(1)),
                quantity,
                self.timestamp,
            )));
            if self.rng.gen_bool(0.5) {
                price += match side {
                    Side::Buy => -1,
                    Side::Sell => 1,
                };
            }
        }
    }

    fn paper(&mut self) -> FeedEvent {
        let side = self.side();
        let order_type = if self.rng.gen_bool(self.config.limit_ratio) {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        let offset = self.rng.gen_range(-2..=2);
        FeedEvent::Paper {
            side,
            order_type,
            price: Decimal::from((self.mid + offset).max(1)),
            quantity: self.quantity(),
            timestamp: self.timestamp,
        }
    }

    pub fn take_events(&mut self, n: usize) -> Vec<FeedEvent> {
        (0..n).map(|_| self.next_event()).collect()
    }

    pub fn all_events(&mut self) -> Vec<FeedEvent> {
        self.take_events(self.config.num_events)
    }
}

/// Counters from [`replay_into_exchange`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub levels: usize,
    pub prints: usize,
    pub orders: usize,
    /// Paper orders refused (unfunded or invalid) without stopping the replay.
    pub rejected: usize,
    pub executions: usize,
}

/// Replays events into the exchange, submitting paper orders for `account`.
/// Pending prints are flushed at the end. Only configuration errors stop the replay.
pub fn replay_into_exchange(
    exchange: &mut PaperExchange,
    account: AccountId,
    events: impl IntoIterator<Item = FeedEvent>,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    for event in events {
        match event {
            FeedEvent::Level(level) => {
                stats.levels += 1;
                exchange.on_feed_level(level).or_else(skip_unit)?;
            }
            FeedEvent::Trade(trade) => {
                stats.prints += 1;
                exchange.on_trade(trade)?;
            }
            FeedEvent::Paper {
                side,
                order_type,
                price,
                quantity,
                timestamp,
            } => {
                let order = PaperOrder {
                    account,
                    side,
                    order_type,
                    price,
                    quantity,
                    timestamp,
                };
                match exchange.submit_order(order) {
                    Ok(report) => {
                        stats.orders += 1;
                        stats.executions += report.executions.len();
                    }
                    Err(e) if e.is_configuration() => return Err(e),
                    Err(_) => stats.rejected += 1,
                }
            }
        }
    }
    exchange.flush_trades()?;
    Ok(stats)
}

fn skip_unit(e: Error) -> Result<()> {
    if e.is_configuration() {
        Err(e)
    } else {
        log::warn!("replay event skipped error={}", e);
        Ok(())
    }
}
