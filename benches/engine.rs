//! Exchange performance benchmarks (Criterion).
//!
//! Run: `cargo bench` or `cargo bench --bench engine`.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use paper_exchange::market_data_gen::{Generator, GeneratorConfig};
use paper_exchange::{
    match_order, replay_into_exchange, AccountId, Asset, AssetPair, BookEntry, ExchangeConfig, FeedLevel, Market,
    OrderId, OrderKind, OrderRequest, PaperExchange, PriceTimeIndex, Priority, Side,
};
use rust_decimal::Decimal;

fn entry(seq: u64, price: i64) -> BookEntry {
    let price = Decimal::from(price);
    BookEntry {
        id: OrderId {
            kind: OrderKind::Paper,
            side: Side::Buy,
            price,
            priority: Priority::At(seq),
            seq,
        },
        side: Side::Buy,
        kind: OrderKind::Paper,
        price,
        remaining: Decimal::ONE,
        priority: Priority::At(seq),
        account: AccountId(1),
    }
}

fn bench_index_upsert_remove(c: &mut Criterion) {
    const N: u64 = 1000;
    let mut group = c.benchmark_group("index");
    group.throughput(Throughput::Elements(N));
    group.bench_function("upsert_then_remove_1000", |b| {
        b.iter_batched(
            || (0..N).map(|i| entry(i, 90 + (i * 7 % 21) as i64)).collect::<Vec<_>>(),
            |entries| {
                let mut index = PriceTimeIndex::new(Side::Buy);
                for e in &entries {
                    index.upsert(e.clone());
                }
                for e in &entries {
                    index.remove(&e.id);
                }
                index
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_match_against_feed(c: &mut Criterion) {
    const LEVELS: i64 = 200;
    const ORDERS: usize = 100;
    let mut group = c.benchmark_group("matching");
    group.throughput(Throughput::Elements(ORDERS as u64));
    group.bench_function("marketable_buys_100_over_200_levels", |b| {
        b.iter_batched(
            || {
                let mut market = Market::new(AssetPair::default());
                let buyer = market.open_account("buyer");
                market.credit(buyer, Asset::Usd, Decimal::from(100_000_000)).unwrap();
                for i in 0..LEVELS {
                    market
                        .apply_level(FeedLevel {
                            side: Side::Sell,
                            price: Decimal::from(100 + i),
                            quantity: Decimal::from(5),
                            timestamp: 1,
                        })
                        .unwrap();
                }
                (market, buyer)
            },
            |(mut market, buyer)| {
                for i in 0..ORDERS {
                    let request = OrderRequest::limit(
                        OrderKind::Paper,
                        Side::Buy,
                        Decimal::from(100 + LEVELS),
                        Decimal::from(7),
                        Priority::At(2 + i as u64),
                        buyer,
                    );
                    let id = market.place(request).unwrap();
                    let _ = match_order(&mut market, &id, 2 + i as u64).unwrap();
                }
                market
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    const N: usize = 1000;
    let mut group = c.benchmark_group("exchange");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("replay_1000_events", |b| {
        b.iter_batched(
            || {
                let mut exchange = PaperExchange::new(ExchangeConfig::default()).unwrap();
                let strategy = exchange.open_account("strategy");
                exchange.credit(strategy, Asset::Usd, Decimal::from(1_000_000)).unwrap();
                exchange.credit(strategy, Asset::Btc, Decimal::from(10_000)).unwrap();
                let events = Generator::new(GeneratorConfig {
                    seed: 42,
                    num_events: N,
                    ..Default::default()
                })
                .all_events();
                (exchange, strategy, events)
            },
            |(mut exchange, strategy, events)| {
                replay_into_exchange(&mut exchange, strategy, events).unwrap();
                exchange
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_index_upsert_remove, bench_match_against_feed, bench_replay);
criterion_main!(benches);
