//! Paper exchange demo: replays a generated feed into a fresh exchange.
//!
//! Configuration comes from `EXCHANGE_CONFIG` plus the single-field overrides
//! documented on [`ExchangeConfig::from_env`]. `FEED_SEED` and `FEED_EVENTS`
//! size the generated stream.

use log::{error, info};
use paper_exchange::{replay_into_exchange, Asset, ExchangeConfig, Generator, GeneratorConfig, PaperExchange};
use rust_decimal::Decimal;
use std::process::ExitCode;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn run() -> paper_exchange::Result<()> {
    let config = ExchangeConfig::from_env()?;
    let mut exchange = PaperExchange::new(config)?;
    let strategy = exchange.open_account("strategy");
    exchange.credit(strategy, Asset::Usd, Decimal::from(1_000_000))?;
    exchange.credit(strategy, Asset::Btc, Decimal::from(10_000))?;

    let generator_config = GeneratorConfig {
        seed: env_or("FEED_SEED", 0),
        num_events: env_or("FEED_EVENTS", 1_000),
        ..Default::default()
    };
    let events = Generator::new(generator_config).all_events();
    let stats = replay_into_exchange(&mut exchange, strategy, events)?;
    info!(
        "replay done levels={} prints={} orders={} rejected={} executions={} sweeps={}",
        stats.levels,
        stats.prints,
        stats.orders,
        stats.rejected,
        stats.executions,
        exchange.reconciliations().len()
    );

    let snapshot = exchange.snapshot();
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("snapshot serialization failed error={}", e),
    }
    info!(
        "balances usd={} btc={}",
        exchange.balance(strategy, Asset::Usd)?,
        exchange.balance(strategy, Asset::Btc)?
    );
    Ok(())
}

fn main() -> ExitCode {
    let _ = env_logger::try_init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("paper exchange failed error={}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
