//! # Paper Exchange
//!
//! Deterministic paper-trading exchange simulator: a price-time order book
//! built from a public L2 feed, price-time matching for strategy (paper)
//! orders, and ghost-liquidity reconciliation of public trade sweeps.
//!
//! ## Entry point
//!
//! Use [`PaperExchange`]: create it from an [`ExchangeConfig`], feed it
//! [`FeedLevel`]s and [`Trade`] prints, and submit [`PaperOrder`]s. Funds move
//! only through [`Funds`] tokens between ledger accounts, so balances are
//! conserved across every fill, cancel and reconciliation.
//!
//! ## Example
//!
//! ```rust
//! use paper_exchange::{Asset, ExchangeConfig, FeedLevel, MatchState, OrderType, PaperExchange, PaperOrder, Side};
//! use rust_decimal::Decimal;
//!
//! let mut exchange = PaperExchange::new(ExchangeConfig::default())?;
//! let trader = exchange.open_account("trader");
//! exchange.credit(trader, Asset::Usd, Decimal::from(1_000))?;
//! exchange.on_feed_level(FeedLevel {
//!     side: Side::Sell,
//!     price: Decimal::from(100),
//!     quantity: Decimal::from(3),
//!     timestamp: 1,
//! })?;
//! let report = exchange.submit_order(PaperOrder {
//!     account: trader,
//!     side: Side::Buy,
//!     order_type: OrderType::Limit,
//!     price: Decimal::from(100),
//!     quantity: Decimal::from(2),
//!     timestamp: 2,
//! })?;
//! assert_eq!(report.state, MatchState::Filled);
//! assert_eq!(exchange.balance(trader, Asset::Btc)?, Decimal::from(2));
//! assert_eq!(exchange.balance(trader, Asset::Usd)?, Decimal::from(800));
//! # Ok::<(), paper_exchange::Error>(())
//! ```
//!
//! ## Lower-level API
//!
//! [`Market`], [`match_order`] and [`Reconciler`] can be driven directly when
//! the caller manages batching and timestamps itself.

pub mod account;
pub mod batched;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod funds;
pub mod ghost;
pub mod market;
pub mod market_data_gen;
pub mod matching;
pub mod order;
pub mod order_book;
pub mod price_time;
pub mod pubsub;
pub mod trade;
pub mod tree;
pub mod types;

pub use account::{Account, AccountPolicy, Ledger, Wallet};
pub use batched::BatchedPubSub;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ExchangeConfig, ImpedimentConfig};
pub use error::{Error, Result};
pub use exchange::{BookSnapshot, LevelView, PaperExchange, PaperOrder};
pub use execution::{Execution, ExecutionStatus};
pub use funds::{Asset, AssetPair, Funds};
pub use ghost::{
    FixedImpediment, GhostEmission, ImpedimentModel, RandomImpediment, Reconciler, Reconciliation, ReconciliationMode,
    SequenceImpediment,
};
pub use market::{FeedLevel, Market};
pub use market_data_gen::{replay_into_exchange, FeedEvent, Generator, GeneratorConfig, ReplayStats};
pub use matching::{match_order, MatchReport, MatchState};
pub use order::{Order, OrderRequest};
pub use order_book::{BookHandle, OrderBook};
pub use price_time::PriceTimeIndex;
pub use pubsub::{PubSub, SubscriptionId};
pub use trade::{sweep_boundary, Trade};
pub use tree::PriorityMap;
pub use types::{AccountId, BookEntry, ExecutionId, OrderId, OrderKind, OrderType, Priority, Side};
